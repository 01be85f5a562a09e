use std::path::Path;

const FONT_SIZE: u32 = 48;
const BORDER_WIDTH: u32 = 4;
const LEFT_MARGIN: u32 = 20;

/// Escape text for ffmpeg drawtext filter syntax: backslash, single quote
/// and colon are meaningful there.
pub fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "'\\''")
        .replace(':', "\\:")
}

/// Running-clock expression evaluated by the transcoder at render time:
/// start-of-day seconds plus elapsed encode time, wrapping at 24 hours.
pub fn clock_expr(start_seconds: u32) -> String {
    format!(
        "%{{eif\\:mod(trunc(({s}+t)/3600)\\,24)\\:d\\:2}}\\:\
         %{{eif\\:mod(trunc(({s}+t)/60)\\,60)\\:d\\:2}}\\:\
         %{{eif\\:mod(trunc({s}+t)\\,60)\\:d\\:2}}",
        s = start_seconds
    )
}

/// Build the three chained drawtext operations: camera name, capture date
/// and the running clock, stacked above the bottom edge.
pub fn build_filter(
    camera: &str,
    date_display: &str,
    start_seconds: u32,
    font: Option<&Path>,
) -> String {
    let style = match font {
        Some(f) => format!(
            "fontfile={}:fontsize={FONT_SIZE}:fontcolor=white:borderw={BORDER_WIDTH}:bordercolor=black:x={LEFT_MARGIN}",
            f.display()
        ),
        None => format!(
            "fontsize={FONT_SIZE}:fontcolor=white:borderw={BORDER_WIDTH}:bordercolor=black:x={LEFT_MARGIN}"
        ),
    };

    let camera = escape_drawtext(camera);
    let date = escape_drawtext(date_display);
    let clock = clock_expr(start_seconds);

    format!(
        "drawtext={style}:y=main_h-180:text='{camera}',\
         drawtext={style}:y=main_h-120:text='{date}',\
         drawtext={style}:y=main_h-60:text='{clock}'"
    )
}
