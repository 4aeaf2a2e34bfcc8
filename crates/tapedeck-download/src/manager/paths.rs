//! Destination path planning for downloads.
//!
//! Every track lands at `<downloads_dir>/<recording>/<track>`. Both
//! components come from remote catalog data, so they are sanitized into a
//! single safe path segment each.
//!
//! Distinct raw names must never share a path: two tasks writing one file
//! would let cleanup of one delete the other's bytes. A segment that
//! sanitizing changed therefore carries `~` and a digest of the raw name,
//! and `~` itself is sanitized, so an untouched name can never look tagged.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tapedeck_core::DownloadError;

/// Hex digits of the raw-name digest appended to rewritten segments.
const TAG_LEN: usize = 12;

/// A planned download destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDestination {
    /// The recording directory where tracks are stored.
    pub recording_dir: PathBuf,
    /// The sanitized track filename within the recording directory.
    pub filename: String,
}

impl DownloadDestination {
    /// Create a new download destination plan.
    ///
    /// # Arguments
    ///
    /// * `downloads_directory` - Base directory for all recordings
    /// * `recording_id` - Recording identifier, used as the subdirectory name
    /// * `track_filename` - Catalog filename of the track
    pub fn plan(downloads_directory: &Path, recording_id: &str, track_filename: &str) -> Self {
        Self {
            recording_dir: downloads_directory.join(unique_segment(recording_id)),
            filename: unique_segment(track_filename),
        }
    }

    /// Ensure the recording directory exists, creating it if necessary.
    pub fn ensure_dir(&self) -> Result<(), DownloadError> {
        if !self.recording_dir.exists() {
            std::fs::create_dir_all(&self.recording_dir)
                .map_err(|e| DownloadError::io("create_dir", e.to_string()))?;
        }
        Ok(())
    }

    /// Full path of the track file.
    pub fn file_path(&self) -> PathBuf {
        self.recording_dir.join(&self.filename)
    }

    /// Bytes already on disk from an earlier attempt (0 if absent).
    pub fn existing_len(&self) -> u64 {
        std::fs::metadata(self.file_path()).map_or(0, |m| m.len())
    }
}

/// Make a catalog string safe to use as one path segment.
///
/// Separators, reserved characters (including the `~` tag marker) and
/// control characters become `_`, and the relative names `.`/`..` (or an
/// empty string) become `_` as well.
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '~' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Sanitized segment that stays unique per raw name.
///
/// Unchanged names pass through. A rewritten name gets `~<digest>` before
/// its extension: `a:b.flac` becomes `a_b~<digest>.flac` while `a_b.flac`
/// stays as is.
fn unique_segment(raw: &str) -> String {
    let cleaned = sanitize_segment(raw);
    if cleaned == raw {
        return cleaned;
    }

    let digest = Sha256::digest(raw.as_bytes());
    let tag = digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    });
    let tag = &tag[..TAG_LEN];

    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{stem}~{tag}.{ext}")
        }
        _ => format!("{cleaned}~{tag}"),
    }
}
