//! Query DTOs returned by the download manager.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::types::{DownloadTask, TaskStatus};

/// Point-in-time view of the queue.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Tasks with a transfer in flight.
    pub active: Vec<DownloadTask>,
    /// Waiting tasks, in admission order.
    pub queued: Vec<DownloadTask>,
    pub paused: Vec<DownloadTask>,
    pub failed: Vec<DownloadTask>,
}

impl QueueSnapshot {
    /// Number of tasks still to be transferred (active + queued + paused).
    pub fn outstanding(&self) -> usize {
        self.active.len() + self.queued.len() + self.paused.len()
    }

    /// Whether nothing is running or waiting.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.queued.is_empty()
    }
}

/// Aggregate status of one recording's task group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub recording_id: String,
    pub total: usize,
    pub queued: usize,
    pub downloading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes_downloaded: u64,
    /// Sum of known sizes; `None` if any track's size is unknown.
    pub total_bytes: Option<u64>,
    /// Every track is marked for deletion.
    pub is_marked_for_deletion: bool,
}

impl RecordingStatus {
    /// Aggregate the tasks of a recording.
    pub fn from_tasks(recording_id: &str, tasks: &[DownloadTask]) -> Self {
        let mut status = Self {
            recording_id: recording_id.to_string(),
            total: tasks.len(),
            total_bytes: Some(0),
            is_marked_for_deletion: !tasks.is_empty(),
            ..Self::default()
        };

        for task in tasks {
            match task.status {
                TaskStatus::Queued => status.queued += 1,
                TaskStatus::Downloading => status.downloading += 1,
                TaskStatus::Paused => status.paused += 1,
                TaskStatus::Completed => status.completed += 1,
                TaskStatus::Failed => status.failed += 1,
                TaskStatus::Cancelled => status.cancelled += 1,
            }
            status.bytes_downloaded += task.bytes_downloaded;
            status.total_bytes = status
                .total_bytes
                .zip(task.total_bytes)
                .map(|(acc, n)| acc + n);
            status.is_marked_for_deletion &= task.is_marked_for_deletion;
        }

        status
    }

    /// All tracks of the recording are downloaded.
    pub const fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Aggregate statistics over the whole store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub queued: u64,
    pub downloading: u64,
    pub paused: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Bytes on disk for completed tasks.
    pub total_bytes_downloaded: u64,
    /// Bytes per second across completed transfers, if any have timing data.
    pub average_throughput_bps: Option<f64>,
}

/// Average throughput over completed tasks.
///
/// Bytes moved by each task's finishing attempt (`bytes_downloaded` minus
/// `resumed_from`) divided by that attempt's duration
/// (`completed_at - started_at`, where `started_at` is the last admission).
/// Tasks missing either timestamp, or with a non-positive duration, are
/// ignored.
#[allow(clippy::cast_precision_loss)]
pub fn average_throughput(completed: &[DownloadTask]) -> Option<f64> {
    let (bytes, elapsed) = completed
        .iter()
        .filter_map(|task| {
            let started = task.started_at?;
            let finished = task.completed_at?;
            let elapsed = finished - started;
            let moved = task.bytes_downloaded.saturating_sub(task.resumed_from);
            (elapsed > Duration::zero()).then_some((moved, elapsed))
        })
        .fold((0u64, Duration::zero()), |(b, e), (tb, te)| (b + tb, e + te));

    let millis = elapsed.num_milliseconds();
    (millis > 0).then(|| bytes as f64 / (millis as f64 / 1000.0))
}
