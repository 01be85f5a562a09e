use std::fs;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::extract::extract_metadata;
use crate::ffmpeg::Transcoder;
use crate::metadata::CameraMetadata;
use crate::overlay::build_filter;
use crate::video::VideoFile;
use crate::{BurnOptions, ProgressSink};

/// Terminal result of one file's pipeline. Produced exactly once per input;
/// nothing a job does may leak out as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Output written; elapsed wall time feeds the ETA.
    Succeeded { elapsed: Duration },
    /// Output already existed, nothing was done.
    Skipped,
    Failed { reason: String },
}

/// Run one file through check → extract → transcode, classifying every
/// failure into the outcome.
pub fn run(
    video: &VideoFile,
    transcoder: &dyn Transcoder,
    options: &BurnOptions,
    sink: &dyn ProgressSink,
) -> JobOutcome {
    if video.output_exists() {
        info!(file = %video.file_name, "output already present, skipping");
        return JobOutcome::Skipped;
    }

    let started = Instant::now();

    let metadata = match recover_metadata(video, transcoder, options) {
        Ok(m) => m,
        Err(e) => return JobOutcome::Failed { reason: e },
    };
    info!(
        file = %video.file_name,
        camera = %metadata.camera,
        start = %metadata.start_time(),
        "burning overlay"
    );

    if let Some(parent) = video.output_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            let reason = format!("cannot create output directory {}: {e}", parent.display());
            // Unwritable output directories also raise a blocking
            // user-facing notification.
            sink.error(&reason);
            return JobOutcome::Failed { reason };
        }
    }

    let filter = build_filter(
        &metadata.camera,
        &video.date_display(),
        metadata.start_seconds,
        options.font.as_deref(),
    );

    match transcoder.burn(&video.path, &filter, &video.output_path) {
        Ok(()) => JobOutcome::Succeeded {
            elapsed: started.elapsed(),
        },
        Err(e) => JobOutcome::Failed {
            reason: format!("{e:#}"),
        },
    }
}

/// Demux the stream and scan it; an absent record is not a failure, the
/// documented defaults label the clip instead.
fn recover_metadata(
    video: &VideoFile,
    transcoder: &dyn Transcoder,
    options: &BurnOptions,
) -> Result<CameraMetadata, String> {
    let chunks = transcoder
        .demux_h264(&video.path)
        .map_err(|e| format!("demux failed: {e:#}"))?;

    match extract_metadata(chunks, options.retain_bytes) {
        Ok(Some(found)) => Ok(found),
        Ok(None) => {
            warn!(file = %video.file_name, "no embedded metadata, using defaults");
            Ok(CameraMetadata::fallback())
        }
        Err(e) => Err(format!("reading demuxed stream: {e}")),
    }
}
