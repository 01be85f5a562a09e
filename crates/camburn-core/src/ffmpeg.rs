use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::{bail, Context};
use tracing::{debug, warn};

/// Read size for the demuxed stream; matches the chunk granularity the
/// extractor is fed.
pub const READ_CHUNK_BYTES: usize = 1_048_576;

/// The external transcoder: one invocation demuxes the video stream into
/// raw Annex-B bytes, the other burns the overlay while re-encoding. Jobs
/// depend only on this trait so the batch can be exercised without a real
/// binary.
pub trait Transcoder {
    /// Codec-copy demux to an Annex-B elementary stream, delivered as a
    /// finite, single-pass chunk sequence.
    fn demux_h264(
        &self,
        input: &Path,
    ) -> anyhow::Result<Box<dyn Iterator<Item = io::Result<Vec<u8>>>>>;

    /// Re-encode with the overlay filter burned in, audio passed through.
    /// Success is exit code 0; failure carries the captured diagnostics.
    fn burn(&self, input: &Path, filter: &str, output: &Path) -> anyhow::Result<()>;
}

/// Production transcoder shelling out to an ffmpeg binary.
pub struct Ffmpeg {
    binary: PathBuf,
    preset: String,
    crf: u8,
}

impl Ffmpeg {
    pub fn new(binary: PathBuf, preset: impl Into<String>, crf: u8) -> Self {
        Self {
            binary,
            preset: preset.into(),
            crf,
        }
    }

    /// Resolve the ffmpeg binary: explicit path if given, otherwise PATH
    /// lookup. A missing binary halts the batch before it starts.
    pub fn locate(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
        match explicit {
            Some(path) => {
                if path.is_file() {
                    Ok(path.to_path_buf())
                } else {
                    bail!("ffmpeg binary not found at {}", path.display())
                }
            }
            None => which::which("ffmpeg").context("ffmpeg not found on PATH"),
        }
    }
}

fn demux_args(input: &Path) -> Vec<String> {
    vec![
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-c:v".into(),
        "copy".into(),
        "-bsf:v".into(),
        "h264_mp4toannexb".into(),
        "-f".into(),
        "h264".into(),
        "-".into(),
    ]
}

fn burn_args(input: &Path, filter: &str, output: &Path, preset: &str, crf: u8) -> Vec<String> {
    vec![
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vf".into(),
        filter.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        preset.to_string(),
        "-crf".into(),
        crf.to_string(),
        "-c:a".into(),
        "copy".into(),
        "-strict".into(),
        "-2".into(),
        "-y".into(),
        output.to_string_lossy().into_owned(),
    ]
}

impl Transcoder for Ffmpeg {
    fn demux_h264(
        &self,
        input: &Path,
    ) -> anyhow::Result<Box<dyn Iterator<Item = io::Result<Vec<u8>>>>> {
        let args = demux_args(input);
        debug!("running: {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.binary.display()))?;

        let stdout = child
            .stdout
            .take()
            .context("demux process has no stdout")?;

        Ok(Box::new(ChunkReader {
            child,
            stdout,
            done: false,
        }))
    }

    fn burn(&self, input: &Path, filter: &str, output: &Path) -> anyhow::Result<()> {
        let args = burn_args(input, filter, output, &self.preset, self.crf);
        debug!("running: {} {}", self.binary.display(), args.join(" "));

        let result = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("failed to spawn {}", self.binary.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!("ffmpeg encode failed: {}", stderr.trim_end());
            bail!(
                "ffmpeg exited with {}: {}",
                result.status,
                last_lines(&stderr, 5)
            );
        }
        if !output.exists() {
            bail!("ffmpeg reported success but wrote no output file");
        }
        Ok(())
    }
}

/// Pull-based chunk sequence over the demux process stdout. Each pull blocks
/// until data arrives or the stream closes; dropping it early reaps the
/// child (first-match extraction rarely reads a stream to the end).
struct ChunkReader {
    child: Child,
    stdout: ChildStdout,
    done: bool,
}

impl Iterator for ChunkReader {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        match self.stdout.read(&mut buf) {
            Ok(0) => {
                self.done = true;
                // Demux exit status is irrelevant; only the bytes matter.
                let _ = self.child.wait();
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(buf))
            }
            Err(e) => {
                self.done = true;
                let _ = self.child.kill();
                let _ = self.child.wait();
                Some(Err(e))
            }
        }
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
