//! Task store port definition.
//!
//! The task store is the single source of truth for the download queue.
//! Every method is atomic for one record; multi-record operations are
//! loops over these calls and must tolerate partial completion.
//!
//! # Design
//!
//! - CRUD + indexed queries only; no business rules
//! - Status changes go through [`TaskStore::transition`], a compare-and-set
//!   on the current status, so two callers can never both win the same move
//! - `updated_at` is maintained by the implementation on every write

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::download::{DownloadTask, TaskId, TaskStatus};

/// Field changes applied together with a status transition.
///
/// `Option<Option<T>>` fields follow the settings-update convention:
/// `None` leaves the column alone, `Some(None)` clears it, `Some(Some(v))`
/// sets it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub error_message: Option<Option<String>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub local_path: Option<Option<PathBuf>>,
    pub retry_count: Option<u32>,
    pub resumed_from: Option<u64>,
    /// Zero `bytes_downloaded` and reset `progress_fraction`.
    pub reset_progress: bool,
    /// Refresh `last_access_timestamp` (never moves it backwards).
    pub accessed_at: Option<DateTime<Utc>>,
    /// Mark the transfer as finished: fraction 1.0, bytes = total.
    pub mark_complete: bool,
}

impl StatusUpdate {
    /// Change only the status.
    pub const fn to(status: TaskStatus) -> Self {
        Self {
            status,
            error_message: None,
            started_at: None,
            completed_at: None,
            local_path: None,
            retry_count: None,
            resumed_from: None,
            reset_progress: false,
            accessed_at: None,
            mark_complete: false,
        }
    }

    /// Set (or clear) the error message.
    #[must_use]
    pub fn with_error(mut self, message: Option<String>) -> Self {
        self.error_message = Some(message);
        self
    }

    /// Set (or clear) `started_at`.
    #[must_use]
    pub const fn with_started_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Set (or clear) `completed_at`.
    #[must_use]
    pub const fn with_completed_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Set (or clear) the local path.
    #[must_use]
    pub fn with_local_path(mut self, path: Option<PathBuf>) -> Self {
        self.local_path = Some(path);
        self
    }

    /// Store a new retry count.
    #[must_use]
    pub const fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Store the offset the finishing attempt resumed from.
    #[must_use]
    pub const fn with_resumed_from(mut self, bytes: u64) -> Self {
        self.resumed_from = Some(bytes);
        self
    }

    /// Reset progress counters.
    #[must_use]
    pub const fn resetting_progress(mut self) -> Self {
        self.reset_progress = true;
        self
    }

    /// Refresh the access timestamp.
    #[must_use]
    pub const fn accessed(mut self, at: DateTime<Utc>) -> Self {
        self.accessed_at = Some(at);
        self
    }

    /// Record a finished transfer.
    #[must_use]
    pub const fn completing(mut self) -> Self {
        self.mark_complete = true;
        self
    }
}

/// Port for durable download task storage.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace a task, keyed by its id.
    async fn upsert(&self, task: &DownloadTask) -> Result<(), RepositoryError>;

    /// Fetch a task.
    async fn get(&self, id: &TaskId) -> Result<Option<DownloadTask>, RepositoryError>;

    /// All tasks, ordered by `enqueue_seq`.
    async fn list_all(&self) -> Result<Vec<DownloadTask>, RepositoryError>;

    /// Tasks in a status, ordered by `enqueue_seq`.
    async fn list_by_status(&self, status: TaskStatus)
    -> Result<Vec<DownloadTask>, RepositoryError>;

    /// Tasks of one recording, ordered by `enqueue_seq`.
    async fn list_by_recording(
        &self,
        recording_id: &str,
    ) -> Result<Vec<DownloadTask>, RepositoryError>;

    /// Tasks with `is_marked_for_deletion`, oldest mark first.
    async fn list_marked_for_deletion(&self) -> Result<Vec<DownloadTask>, RepositoryError>;

    /// Record a progress checkpoint.
    ///
    /// `bytes_downloaded` is clamped to `total_bytes` when the total is known.
    /// A `None` total keeps the stored one.
    async fn update_progress(
        &self,
        id: &TaskId,
        progress_fraction: Option<f64>,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    ) -> Result<(), RepositoryError>;

    /// Atomically apply `update` if the current status is in `allowed_from`.
    ///
    /// Returns the updated task, or `None` if the status did not match.
    /// Returns `RepositoryError::NotFound` if there is no such task.
    async fn transition(
        &self,
        id: &TaskId,
        allowed_from: &[TaskStatus],
        update: StatusUpdate,
    ) -> Result<Option<DownloadTask>, RepositoryError>;

    /// Unconditionally set the status and error message.
    async fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<(), RepositoryError> {
        self.transition(
            id,
            &TaskStatus::ALL,
            StatusUpdate::to(status).with_error(error_message),
        )
        .await
        .map(|_| ())
    }

    /// Change a task's priority.
    async fn set_priority(&self, id: &TaskId, priority: i32) -> Result<(), RepositoryError>;

    /// Set (`Some(at)`) or clear (`None`) the soft-delete mark.
    ///
    /// Both soft-delete columns change together. `accessed_at` refreshes
    /// `last_access_timestamp` when given.
    async fn set_deletion_mark(
        &self,
        id: &TaskId,
        marked_at: Option<DateTime<Utc>>,
        accessed_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;

    /// Remove a task. Returns whether a record existed.
    async fn delete(&self, id: &TaskId) -> Result<bool, RepositoryError>;

    /// Remove a task only while its status is in `allowed_from`.
    ///
    /// Returns the removed record, or `None` if the task is absent or has
    /// moved to another status.
    async fn delete_if(
        &self,
        id: &TaskId,
        allowed_from: &[TaskStatus],
    ) -> Result<Option<DownloadTask>, RepositoryError>;

    /// Move every `Downloading` task back to `Queued`, keeping its progress.
    ///
    /// Returns the ids that were reset.
    async fn reset_interrupted(&self) -> Result<Vec<TaskId>, RepositoryError>;

    /// Number of tasks in a status.
    async fn count_by_status(&self, status: TaskStatus) -> Result<u64, RepositoryError>;

    /// Sum of `bytes_downloaded` over completed tasks.
    async fn total_bytes_downloaded(&self) -> Result<u64, RepositoryError>;

    /// Next value for `enqueue_seq`.
    async fn next_enqueue_seq(&self) -> Result<i64, RepositoryError>;
}
