use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use camburn_core::status::StatusFileSink;
use camburn_core::{BatchSummary, BurnOptions, CancelToken, ProgressSink, ProgressUpdate};

#[derive(Parser)]
#[command(
    name = "camburn",
    version,
    about = "Burn camera name, date and a running clock onto videos from their embedded stream metadata"
)]
struct Cli {
    /// Video files or directories (searched recursively for .mp4 files).
    /// Defaults to the current directory.
    inputs: Vec<PathBuf>,

    /// Path to the ffmpeg binary (default: found on PATH)
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Font file for the overlay text
    #[arg(long)]
    font: Option<PathBuf>,

    /// x264 encoder preset
    #[arg(long, default_value = "ultrafast")]
    preset: String,

    /// x264 CRF quality (lower is better)
    #[arg(long, default_value_t = 23)]
    crf: u8,

    /// Mirror progress as JSON to this file after every update
    #[arg(long)]
    status_file: Option<PathBuf>,
}

/// Terminal progress bar rendering of the batch.
struct TerminalSink {
    bar: ProgressBar,
}

impl TerminalSink {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(ProgressStyle::default_bar());
        Self { bar }
    }
}

impl ProgressSink for TerminalSink {
    fn update(&self, u: &ProgressUpdate) {
        self.bar.set_length(u.total as u64);
        self.bar.set_position(u.success + u.skipped + u.failed);
        let eta = match &u.eta {
            Some(e) => format!("  eta {e}"),
            None => String::new(),
        };
        self.bar.set_message(format!(
            "[{}/{}] {}{eta}",
            u.index, u.total, u.current_file
        ));
    }

    fn finish(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }

    fn error(&self, message: &str) {
        self.bar.suspend(|| eprintln!("ERROR: {message}"));
    }
}

/// Forwards every event to each configured sink.
struct FanoutSink(Vec<Box<dyn ProgressSink>>);

impl ProgressSink for FanoutSink {
    fn update(&self, update: &ProgressUpdate) {
        for sink in &self.0 {
            sink.update(update);
        }
    }
    fn finish(&self, summary: &BatchSummary) {
        for sink in &self.0 {
            sink.finish(summary);
        }
    }
    fn error(&self, message: &str) {
        for sink in &self.0 {
            sink.error(message);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())?;
    }

    let options = BurnOptions {
        inputs: cli.inputs,
        ffmpeg: cli.ffmpeg,
        font: cli.font,
        preset: cli.preset,
        crf: cli.crf,
        ..BurnOptions::default()
    };

    let mut sinks: Vec<Box<dyn ProgressSink>> = vec![Box::new(TerminalSink::new())];
    if let Some(path) = cli.status_file {
        sinks.push(Box::new(StatusFileSink::new(path)));
    }
    let sink = FanoutSink(sinks);

    let summary = camburn_core::process_with_control(&options, &cancel, &sink)?;

    if summary.total == 0 {
        eprintln!("No .mp4 files to process. Nothing to do.");
        return Ok(());
    }

    eprintln!(
        "Done! {} processed, {} skipped, {} failed ({:.1}s)",
        summary.success,
        summary.skipped,
        summary.failed,
        summary.elapsed.as_secs_f64()
    );
    if !summary.skipped_files.is_empty() {
        eprintln!("Previously processed:");
        for name in &summary.skipped_files {
            eprintln!("  {name}");
        }
    }
    if cancel.is_cancelled() {
        eprintln!("Stopped early on request.");
    }

    Ok(())
}
