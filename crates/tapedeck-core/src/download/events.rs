//! Download events - discriminated union for all queue state changes.

use serde::{Deserialize, Serialize};

/// Single discriminated union for all download events.
///
/// Serialized with a `type` tag so subscribers can switch on it:
///
/// ```text
/// { "type": "task_progress", "id": "…", "downloaded": 1024, "total": 4096, "speed_bps": 512.0 }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// A task was created or re-queued by enqueue.
    TaskQueued {
        id: String,
        recording_id: String,
        priority: i32,
    },

    /// A task was admitted and its transfer started.
    TaskStarted { id: String },

    /// Progress checkpoint for an active transfer.
    TaskProgress {
        id: String,
        downloaded: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        /// Smoothed transfer speed in bytes per second.
        speed_bps: f64,
    },

    /// A transfer finished and the file is on disk.
    TaskCompleted { id: String, local_path: String },

    /// A transfer failed.
    TaskFailed { id: String, error: String },

    /// A task was paused.
    TaskPaused { id: String },

    /// A paused task went back to the queue.
    TaskResumed { id: String },

    /// A task was cancelled.
    TaskCancelled { id: String },

    /// A failed or cancelled task was put back in the queue.
    TaskRequeued { id: String, retry_count: u32 },

    /// A task record was removed outright.
    TaskRemoved { id: String },

    /// Every track of a recording is now complete.
    RecordingCompleted {
        recording_id: String,
        track_count: usize,
    },

    /// Tasks were marked for deletion.
    MarkedForDeletion { target: String, affected: usize },

    /// Soft-deleted tasks were restored.
    Restored { target: String, affected: usize },

    /// A cleanup sweep finished.
    CleanupCompleted {
        removed: usize,
        file_errors: usize,
        bytes_freed: u64,
    },

    /// Free space on the downloads volume fell below the threshold.
    StorageLow { available: u64, threshold: u64 },
}

impl DownloadEvent {
    /// Create a progress event.
    pub fn progress(id: impl Into<String>, downloaded: u64, total: Option<u64>, speed_bps: f64) -> Self {
        Self::TaskProgress {
            id: id.into(),
            downloaded,
            total,
            speed_bps,
        }
    }

    /// Create a failure event.
    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::TaskFailed {
            id: id.into(),
            error: error.into(),
        }
    }

    /// The task id this event concerns, if it is a per-task event.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskQueued { id, .. }
            | Self::TaskStarted { id }
            | Self::TaskProgress { id, .. }
            | Self::TaskCompleted { id, .. }
            | Self::TaskFailed { id, .. }
            | Self::TaskPaused { id }
            | Self::TaskResumed { id }
            | Self::TaskCancelled { id }
            | Self::TaskRequeued { id, .. }
            | Self::TaskRemoved { id } => Some(id),
            Self::RecordingCompleted { .. }
            | Self::MarkedForDeletion { .. }
            | Self::Restored { .. }
            | Self::CleanupCompleted { .. }
            | Self::StorageLow { .. } => None,
        }
    }
}
