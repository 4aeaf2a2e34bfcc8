//! Core download types: task identity, status and the task record.

use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Separator between recording and filename when deriving a task id.
///
/// ASCII unit separator: cannot appear in archive identifiers or filenames,
/// so `("a", "b/c")` and `("a/b", "c")` never collide.
const ID_SEPARATOR: u8 = 0x1F;

/// Stable identifier for a download task.
///
/// Derived deterministically from `(recording_id, track_filename)` so that
/// enqueuing the same file twice addresses the same record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Derive the id for a track of a recording.
    ///
    /// The id is the lowercase hex of the first 16 bytes of
    /// `SHA-256(recording_id || 0x1F || track_filename)`.
    pub fn derive(recording_id: &str, track_filename: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(recording_id.as_bytes());
        hasher.update([ID_SEPARATOR]);
        hasher.update(track_filename.as_bytes());
        let digest = hasher.finalize();

        let hex = digest[..16].iter().fold(String::with_capacity(32), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        });
        Self(hex)
    }

    /// Wrap an id read back from storage or user input.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a download task.
///
/// Legal moves are encoded in [`TaskStatus::can_transition_to`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for admission.
    Queued,
    /// A transfer is in flight.
    Downloading,
    /// Held by the user; not eligible for admission.
    Paused,
    /// File is on disk.
    Completed,
    /// Transfer failed; awaiting a retry.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Queued,
        Self::Downloading,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Convert to string representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from string representation.
    ///
    /// Returns `None` for unknown values rather than guessing a status.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "downloading" => Some(Self::Downloading),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Downloading -> Queued` is only used by crash recovery.
    /// `Completed` has no outgoing transitions; soft-delete marking is
    /// tracked separately from status.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Queued,
                Self::Downloading | Self::Paused | Self::Cancelled
            ) | (
                Self::Downloading,
                Self::Completed | Self::Failed | Self::Paused | Self::Cancelled | Self::Queued
            ) | (Self::Paused, Self::Queued | Self::Cancelled)
                | (Self::Failed | Self::Cancelled, Self::Queued)
        )
    }

    /// Statuses from which `next` can be reached.
    #[must_use]
    pub fn sources_of(next: Self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a soft-delete or restore applies to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DeletionTarget {
    /// A single task.
    Task(TaskId),
    /// Every task of a recording.
    Recording(String),
}

impl fmt::Display for DeletionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task:{id}"),
            Self::Recording(id) => write!(f, "recording:{id}"),
        }
    }
}

/// A file selected for download from a recording.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackFile {
    /// Filename within the recording (e.g. `gd77-05-08d1t01.mp3`).
    pub filename: String,
    /// Where to fetch it from.
    pub source_url: String,
    /// Format label from the catalog (e.g. `VBR MP3`, `Flac`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Size in bytes, when the catalog knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl TrackFile {
    /// Create a track file with an unknown size and format.
    pub fn new(filename: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            source_url: source_url.into(),
            format: None,
            size: None,
        }
    }

    /// Set the format label.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set the known size.
    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// One file-download unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: TaskId,
    pub recording_id: String,
    pub track_filename: String,
    pub source_url: String,
    pub format: Option<String>,
    pub status: TaskStatus,
    /// Higher runs first.
    pub priority: i32,
    /// Tie-break for equal priority; assigned on fresh enqueue.
    pub enqueue_seq: i64,
    /// `0.0..=1.0`, `None` while the total size is unknown.
    pub progress_fraction: Option<f64>,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    /// Bytes already on disk when the finishing attempt began.
    #[serde(default)]
    pub resumed_from: u64,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Maintained by the store on every write.
    pub updated_at: DateTime<Utc>,
    pub local_path: Option<PathBuf>,
    pub is_marked_for_deletion: bool,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub last_access_timestamp: DateTime<Utc>,
}

impl DownloadTask {
    /// Build a fresh `Queued` task for a track of a recording.
    pub fn queued(
        recording_id: &str,
        file: &TrackFile,
        priority: i32,
        enqueue_seq: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::derive(recording_id, &file.filename),
            recording_id: recording_id.to_string(),
            track_filename: file.filename.clone(),
            source_url: file.source_url.clone(),
            format: file.format.clone(),
            status: TaskStatus::Queued,
            priority,
            enqueue_seq,
            progress_fraction: file.size.map(|_| 0.0),
            bytes_downloaded: 0,
            total_bytes: file.size,
            resumed_from: 0,
            retry_count: 0,
            error_message: None,
            queued_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            local_path: None,
            is_marked_for_deletion: false,
            deletion_timestamp: None,
            last_access_timestamp: now,
        }
    }

    /// Bytes still to transfer, when the total is known.
    pub fn remaining_bytes(&self) -> Option<u64> {
        self.total_bytes
            .map(|total| total.saturating_sub(self.bytes_downloaded))
    }

    /// Whether the scheduler may pick this task up.
    pub const fn is_admissible(&self) -> bool {
        matches!(self.status, TaskStatus::Queued) && !self.is_marked_for_deletion
    }
}

/// Compute a progress fraction, clamped to `0.0..=1.0`.
///
/// Returns `None` when the total is unknown or zero.
#[allow(clippy::cast_precision_loss)]
pub fn progress_fraction(downloaded: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(total) if total > 0 => Some((downloaded as f64 / total as f64).clamp(0.0, 1.0)),
        _ => None,
    }
}
