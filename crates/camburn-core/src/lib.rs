pub mod extract;
pub mod ffmpeg;
pub mod job;
pub mod metadata;
pub mod overlay;
pub mod sei;
pub mod status;
pub mod video;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ffmpeg::{Ffmpeg, Transcoder};
use crate::job::JobOutcome;
use crate::video::VideoFile;

pub use crate::extract::DEFAULT_RETAIN_BYTES;
pub use crate::metadata::CameraMetadata;

fn default_preset() -> String {
    "ultrafast".to_string()
}

fn default_crf() -> u8 {
    23
}

fn default_retain_bytes() -> usize {
    DEFAULT_RETAIN_BYTES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnOptions {
    /// Files and directories to process; empty means the working directory.
    pub inputs: Vec<PathBuf>,
    /// Explicit ffmpeg binary, otherwise resolved from PATH.
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,
    /// Font file for the overlay text.
    #[serde(default)]
    pub font: Option<PathBuf>,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// Stream buffer retention window for metadata extraction.
    #[serde(default = "default_retain_bytes")]
    pub retain_bytes: usize,
}

impl Default for BurnOptions {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            ffmpeg: None,
            font: None,
            preset: default_preset(),
            crf: default_crf(),
            retain_bytes: default_retain_bytes(),
        }
    }
}

/// One progress publication: which file is active, the counters so far and
/// the current time-remaining estimate, if one exists yet.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    /// 1-based position of the active file.
    pub index: usize,
    pub total: usize,
    pub current_file: String,
    pub success: u64,
    pub skipped: u64,
    pub failed: u64,
    pub eta: Option<String>,
}

/// Final aggregate published once per batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: u64,
    pub skipped: u64,
    pub failed: u64,
    pub skipped_files: Vec<String>,
    pub elapsed: Duration,
}

impl BatchSummary {
    fn empty() -> Self {
        Self {
            total: 0,
            success: 0,
            skipped: 0,
            failed: 0,
            skipped_files: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Where progress goes. The orchestrator depends only on this; a terminal
/// bar, a polled status file or a test recorder all plug in the same way.
pub trait ProgressSink {
    /// Called before and after every job.
    fn update(&self, update: &ProgressUpdate);
    /// Called exactly once when the batch ends.
    fn finish(&self, summary: &BatchSummary);
    /// Blocking user-facing error, e.g. an unwritable output directory.
    fn error(&self, message: &str);
}

/// Sink that drops everything; embeddings that poll state elsewhere use it.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn update(&self, _update: &ProgressUpdate) {}
    fn finish(&self, _summary: &BatchSummary) {}
    fn error(&self, _message: &str) {}
}

/// Cooperative stop flag, checked between files only; a running transcode
/// is never preempted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Running tallies for the batch, owned by the orchestration loop alone.
/// `success + skipped + failed` always equals the number of files
/// dispatched so far.
#[derive(Debug, Default)]
struct BatchState {
    success: u64,
    skipped: u64,
    failed: u64,
    durations: Vec<Duration>,
    skipped_files: Vec<String>,
    current_file: String,
}

impl BatchState {
    fn record(&mut self, file_name: &str, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Succeeded { elapsed } => {
                self.success += 1;
                self.durations.push(*elapsed);
            }
            JobOutcome::Skipped => {
                self.skipped += 1;
                self.skipped_files.push(file_name.to_string());
            }
            JobOutcome::Failed { reason } => {
                self.failed += 1;
                info!(file = %file_name, %reason, "job failed");
            }
        }
    }

    fn dispatched(&self) -> u64 {
        self.success + self.skipped + self.failed
    }

    /// Mean duration of completed successes times the files still ahead.
    /// Strictly causal: nothing is estimated until a success has finished.
    fn eta(&self, total: usize) -> Option<String> {
        if self.durations.is_empty() {
            return None;
        }
        let remaining = total as u64 - self.dispatched();
        if remaining == 0 {
            return None;
        }
        let avg = self.durations.iter().sum::<Duration>() / self.durations.len() as u32;
        let est = avg.as_secs_f64() * remaining as f64;
        Some(format!("{}m {}s", (est / 60.0) as u64, (est % 60.0) as u64))
    }

    fn progress(&self, index: usize, total: usize) -> ProgressUpdate {
        ProgressUpdate {
            index,
            total,
            current_file: self.current_file.clone(),
            success: self.success,
            skipped: self.skipped,
            failed: self.failed,
            eta: self.eta(total),
        }
    }

    fn into_summary(self, total: usize, elapsed: Duration) -> BatchSummary {
        BatchSummary {
            total,
            success: self.success,
            skipped: self.skipped,
            failed: self.failed,
            skipped_files: self.skipped_files,
            elapsed,
        }
    }
}

/// Run the whole batch with default control.
pub fn process(options: &BurnOptions, sink: &dyn ProgressSink) -> anyhow::Result<BatchSummary> {
    process_with_control(options, &CancelToken::new(), sink)
}

/// Enumerate inputs, resolve the transcoder and run the batch. An empty
/// input set is a no-op summary (`total == 0`), not an error, and is
/// distinct from a batch where every file was skipped.
pub fn process_with_control(
    options: &BurnOptions,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
) -> anyhow::Result<BatchSummary> {
    let videos = video::collect_videos(&options.inputs)?;
    if videos.is_empty() {
        return Ok(BatchSummary::empty());
    }

    let binary = Ffmpeg::locate(options.ffmpeg.as_deref())?;
    let transcoder = Ffmpeg::new(binary, options.preset.clone(), options.crf);
    Ok(run_batch(&videos, &transcoder, options, cancel, sink))
}

/// The orchestration loop: strictly sequential, outcomes recorded in
/// submission order, one file's failure never touching the next.
pub fn run_batch(
    videos: &[VideoFile],
    transcoder: &dyn Transcoder,
    options: &BurnOptions,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
) -> BatchSummary {
    let started = Instant::now();
    let total = videos.len();
    let mut state = BatchState::default();

    for (idx, video) in videos.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("stop requested, not starting the next file");
            break;
        }

        state.current_file = video.file_name.clone();
        sink.update(&state.progress(idx + 1, total));

        let outcome = job::run(video, transcoder, options, sink);
        state.record(&video.file_name, &outcome);
        debug_assert_eq!(state.dispatched(), idx as u64 + 1);

        sink.update(&state.progress(idx + 1, total));
    }

    let summary = state.into_summary(total, started.elapsed());
    sink.finish(&summary);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::fs::File;
    use std::io;
    use std::path::Path;
    use tempfile::tempdir;

    use crate::metadata::make_payload;
    use crate::sei::SEI_MARKER;

    fn stream_with_record(name: &[u8], secs: u16) -> Vec<u8> {
        let payload = make_payload(name, secs);
        let mut buf = vec![0u8; 256];
        buf.extend_from_slice(&SEI_MARKER);
        buf.push(payload.len() as u8);
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&[0u8; 256]);
        buf
    }

    /// Transcoder double: serves a canned demux stream and writes a
    /// placeholder output file, optionally failing for chosen file names.
    struct FakeTranscoder {
        stream: Vec<u8>,
        fail_burn: HashSet<String>,
        burns: RefCell<Vec<String>>,
        last_filter: RefCell<Option<String>>,
    }

    impl FakeTranscoder {
        fn new(stream: Vec<u8>) -> Self {
            Self {
                stream,
                fail_burn: HashSet::new(),
                burns: RefCell::new(Vec::new()),
                last_filter: RefCell::new(None),
            }
        }
    }

    impl Transcoder for FakeTranscoder {
        fn demux_h264(
            &self,
            _input: &Path,
        ) -> anyhow::Result<Box<dyn Iterator<Item = io::Result<Vec<u8>>>>> {
            let chunks: Vec<io::Result<Vec<u8>>> =
                self.stream.chunks(64).map(|c| Ok(c.to_vec())).collect();
            Ok(Box::new(chunks.into_iter()))
        }

        fn burn(&self, input: &Path, filter: &str, output: &Path) -> anyhow::Result<()> {
            let name = input.file_name().unwrap().to_str().unwrap().to_string();
            self.burns.borrow_mut().push(name.clone());
            *self.last_filter.borrow_mut() = Some(filter.to_string());
            if self.fail_burn.contains(&name) {
                anyhow::bail!("simulated encode failure");
            }
            std::fs::write(output, b"encoded")?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        updates: RefCell<Vec<ProgressUpdate>>,
        summaries: RefCell<Vec<BatchSummary>>,
        errors: RefCell<Vec<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn update(&self, update: &ProgressUpdate) {
            self.updates.borrow_mut().push(update.clone());
        }
        fn finish(&self, summary: &BatchSummary) {
            self.summaries.borrow_mut().push(summary.clone());
        }
        fn error(&self, message: &str) {
            self.errors.borrow_mut().push(message.to_string());
        }
    }

    fn make_inputs(dir: &Path, names: &[&str]) -> Vec<VideoFile> {
        let mut paths = Vec::new();
        for name in names {
            let p = dir.join(name);
            File::create(&p).unwrap();
            paths.push(p);
        }
        crate::video::collect_videos(&paths).unwrap()
    }

    #[test]
    fn test_batch_success_counters_and_outputs() {
        let dir = tempdir().unwrap();
        let videos = make_inputs(dir.path(), &["a-20250601.mp4", "b-20250601.mp4"]);
        let transcoder = FakeTranscoder::new(stream_with_record(b"CAM-front", 3661));
        let sink = RecordingSink::default();

        let summary = run_batch(
            &videos,
            &transcoder,
            &BurnOptions::default(),
            &CancelToken::new(),
            &sink,
        );

        assert_eq!(summary.total, 2);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 0);
        for v in &videos {
            assert!(v.output_exists());
        }
        assert_eq!(sink.summaries.borrow().len(), 1);

        // Counters never drift from dispatch count on any published update.
        for u in sink.updates.borrow().iter() {
            assert!(u.success + u.skipped + u.failed <= u.total as u64);
        }

        // The burned filter carried the decoded identity and clock start.
        let filter = transcoder.last_filter.borrow().clone().unwrap();
        assert!(filter.contains("text='CAM-front'"));
        assert!(filter.contains("(3661+t)"));
    }

    #[test]
    fn test_rerun_skips_everything() {
        let dir = tempdir().unwrap();
        let videos = make_inputs(dir.path(), &["a.mp4", "b.mp4", "c.mp4"]);
        let transcoder = FakeTranscoder::new(stream_with_record(b"CAM-x", 0));
        let options = BurnOptions::default();

        let first = run_batch(
            &videos,
            &transcoder,
            &options,
            &CancelToken::new(),
            &NullSink,
        );
        assert_eq!(first.success, 3);

        let second = run_batch(
            &videos,
            &transcoder,
            &options,
            &CancelToken::new(),
            &NullSink,
        );
        assert_eq!(second.skipped, 3);
        assert_eq!(second.success, 0);
        assert_eq!(second.failed, 0);
        assert_eq!(
            second.skipped_files,
            vec!["a.mp4".to_string(), "b.mp4".to_string(), "c.mp4".to_string()]
        );
        // No extra transcodes happened on the second run.
        assert_eq!(transcoder.burns.borrow().len(), 3);
    }

    #[test]
    fn test_failure_is_isolated() {
        let dir = tempdir().unwrap();
        let videos = make_inputs(dir.path(), &["a.mp4", "b.mp4"]);
        let mut transcoder = FakeTranscoder::new(stream_with_record(b"CAM-x", 0));
        transcoder.fail_burn.insert("a.mp4".to_string());
        let sink = RecordingSink::default();

        let summary = run_batch(
            &videos,
            &transcoder,
            &BurnOptions::default(),
            &CancelToken::new(),
            &sink,
        );

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success, 1);
        assert!(videos[1].output_exists());
    }

    #[test]
    fn test_eta_absent_then_present() {
        let dir = tempdir().unwrap();
        let videos = make_inputs(dir.path(), &["a.mp4", "b.mp4", "c.mp4"]);
        let transcoder = FakeTranscoder::new(stream_with_record(b"CAM-x", 0));
        let sink = RecordingSink::default();

        run_batch(
            &videos,
            &transcoder,
            &BurnOptions::default(),
            &CancelToken::new(),
            &sink,
        );

        let updates = sink.updates.borrow();
        // First publication of the batch carries no estimate.
        assert!(updates[0].eta.is_none());
        // Once the first file has succeeded, the next file's publication
        // has one.
        let pre_second = updates.iter().find(|u| u.index == 2).unwrap();
        assert!(pre_second.eta.is_some());
        assert!(!pre_second.eta.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_no_metadata_uses_defaults() {
        let dir = tempdir().unwrap();
        let videos = make_inputs(dir.path(), &["plain.mp4"]);
        // Stream with no marker at all.
        let transcoder = FakeTranscoder::new(vec![0u8; 4096]);

        let summary = run_batch(
            &videos,
            &transcoder,
            &BurnOptions::default(),
            &CancelToken::new(),
            &NullSink,
        );

        assert_eq!(summary.success, 1);
        let filter = transcoder.last_filter.borrow().clone().unwrap();
        assert!(filter.contains("text='NO CAMERA NAME'"));
        assert!(filter.contains("(0+t)"));
    }

    #[test]
    fn test_empty_batch_is_distinct_from_all_skipped() {
        let transcoder = FakeTranscoder::new(Vec::new());
        let empty = run_batch(
            &[],
            &transcoder,
            &BurnOptions::default(),
            &CancelToken::new(),
            &NullSink,
        );
        assert_eq!(empty.total, 0);

        let dir = tempdir().unwrap();
        let videos = make_inputs(dir.path(), &["a.mp4"]);
        let all_skipped_transcoder = FakeTranscoder::new(stream_with_record(b"CAM-x", 0));
        run_batch(
            &videos,
            &all_skipped_transcoder,
            &BurnOptions::default(),
            &CancelToken::new(),
            &NullSink,
        );
        let second = run_batch(
            &videos,
            &all_skipped_transcoder,
            &BurnOptions::default(),
            &CancelToken::new(),
            &NullSink,
        );
        assert!(second.total > 0 && second.skipped as usize == second.total);
    }

    #[test]
    fn test_cancel_stops_before_next_file() {
        let dir = tempdir().unwrap();
        let videos = make_inputs(dir.path(), &["a.mp4", "b.mp4"]);
        let transcoder = FakeTranscoder::new(stream_with_record(b"CAM-x", 0));
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = run_batch(
            &videos,
            &transcoder,
            &BurnOptions::default(),
            &cancel,
            &NullSink,
        );

        assert_eq!(summary.success + summary.skipped + summary.failed, 0);
        assert!(transcoder.burns.borrow().is_empty());
    }

    #[test]
    fn test_dir_creation_failure_notifies_user() {
        let dir = tempdir().unwrap();
        // Make the would-be output directory path unusable by occupying
        // `with_overlay` with a regular file.
        File::create(dir.path().join("with_overlay")).unwrap();
        let videos = make_inputs(dir.path(), &["a.mp4"]);
        let transcoder = FakeTranscoder::new(stream_with_record(b"CAM-x", 0));
        let sink = RecordingSink::default();

        let summary = run_batch(
            &videos,
            &transcoder,
            &BurnOptions::default(),
            &CancelToken::new(),
            &sink,
        );

        assert_eq!(summary.failed, 1);
        assert_eq!(sink.errors.borrow().len(), 1);
        assert!(sink.errors.borrow()[0].contains("output directory"));
    }
}
