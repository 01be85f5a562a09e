use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use crate::{BatchSummary, ProgressSink, ProgressUpdate};

/// Progress sink that mirrors the latest state into a JSON file an external
/// display can poll. Writes go through a temp file and rename so a poller
/// never observes a half-written record. Write failures are swallowed;
/// display freshness has no bearing on the pipeline.
pub struct StatusFileSink {
    path: PathBuf,
}

#[derive(Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum StatusRecord<'a> {
    Running {
        #[serde(flatten)]
        progress: &'a ProgressUpdate,
    },
    Complete {
        #[serde(flatten)]
        summary: &'a BatchSummary,
    },
    Error {
        message: &'a str,
    },
}

impl StatusFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write(&self, record: &StatusRecord<'_>) {
        if let Err(e) = self.try_write(record) {
            warn!("status file write failed: {e}");
        }
    }

    fn try_write(&self, record: &StatusRecord<'_>) -> anyhow::Result<()> {
        let tmp = self.path.with_extension("tmp");
        let file = File::create(&tmp)?;
        serde_json::to_writer_pretty(BufWriter::new(file), record)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ProgressSink for StatusFileSink {
    fn update(&self, update: &ProgressUpdate) {
        self.write(&StatusRecord::Running { progress: update });
    }

    fn finish(&self, summary: &BatchSummary) {
        self.write(&StatusRecord::Complete { summary });
    }

    fn error(&self, message: &str) {
        self.write(&StatusRecord::Error { message });
    }
}
