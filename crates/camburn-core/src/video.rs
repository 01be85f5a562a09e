use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

/// Output directory created next to each input file.
pub const OUTPUT_DIR_NAME: &str = "with_overlay";
/// Suffix appended to output stems; files carrying it are never inputs.
pub const OUTPUT_SUFFIX: &str = "_overlay";

static DATE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{8}").unwrap());

/// One input video and everything derived from its path. Immutable once
/// constructed.
#[derive(Debug, Clone)]
pub struct VideoFile {
    pub path: PathBuf,
    pub file_name: String,
    pub output_path: PathBuf,
    /// Capture date read from an 8-digit YYYYMMDD token in the filename.
    pub capture_date: Option<NaiveDate>,
}

impl VideoFile {
    pub fn new(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video");
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let output_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(OUTPUT_DIR_NAME)
            .join(format!("{stem}{OUTPUT_SUFFIX}.{ext}"));
        let capture_date = date_token(&file_name);

        Self {
            path,
            file_name,
            output_path,
            capture_date,
        }
    }

    /// The idempotency check: an existing output marks this file as done.
    pub fn output_exists(&self) -> bool {
        self.output_path.exists()
    }

    /// Capture date as `MM-DD-YYYY` for the overlay, or `"Unknown Date"`.
    pub fn date_display(&self) -> String {
        match self.capture_date {
            Some(d) => d.format("%m-%d-%Y").to_string(),
            None => "Unknown Date".to_string(),
        }
    }
}

/// First 8 contiguous digits anywhere in the filename, read as YYYYMMDD.
/// Eight digits that are not a real calendar date count as no token.
fn date_token(file_name: &str) -> Option<NaiveDate> {
    let m = DATE_TOKEN_RE.find(file_name)?;
    NaiveDate::parse_from_str(m.as_str(), "%Y%m%d").ok()
}

/// Expand explicit files and directories into the sorted batch input list.
/// Directories are walked recursively for `.mp4` files; previous outputs
/// (any name containing the overlay suffix) are excluded. With no explicit
/// inputs, the current working directory is walked.
pub fn collect_videos(inputs: &[PathBuf]) -> anyhow::Result<Vec<VideoFile>> {
    let mut paths: Vec<PathBuf> = Vec::new();

    if inputs.is_empty() {
        walk_videos(Path::new("."), &mut paths);
    } else {
        for input in inputs {
            if input.is_dir() {
                walk_videos(input, &mut paths);
            } else if input.is_file() && is_candidate(input) {
                paths.push(input.clone());
            }
        }
    }

    paths.sort();
    paths.dedup();
    Ok(paths.into_iter().map(VideoFile::new).collect())
}

fn walk_videos(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_videos(&path, out);
        } else if is_candidate(&path) {
            out.push(path);
        }
    }
}

fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_lowercase();
    lower.ends_with(".mp4") && !lower.contains(&format!("{OUTPUT_SUFFIX}."))
}
