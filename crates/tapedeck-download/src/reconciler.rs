//! Soft-delete reconciliation.
//!
//! Removing content is a two-step affair. `mark_for_deletion` only flags
//! records (status and files stay as they are) and `restore` undoes that.
//! Once a mark is older than the grace period, `cleanup` removes the file
//! and then the record. Re-running any of these is harmless.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tapedeck_core::{
    DeletionTarget, DownloadError, DownloadResult, DownloadTask, RecordingHook, TaskId,
    TaskStore,
};

use crate::manager::DownloadDestination;

/// Outcome of a cleanup sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Task records that were removed.
    pub removed: Vec<TaskId>,
    /// Files that could not be deleted (their records were removed anyway).
    pub file_errors: usize,
    /// Records whose removal failed; they stay marked for the next sweep.
    pub record_errors: usize,
    /// Bytes of file data deleted.
    pub bytes_freed: u64,
    /// Recordings left with no task records.
    pub purged_recordings: Vec<String>,
}

/// Marks, restores and purges soft-deleted tasks.
#[derive(Clone)]
pub struct SoftDeleteReconciler {
    store: Arc<dyn TaskStore>,
    hook: Arc<dyn RecordingHook>,
    downloads_dir: PathBuf,
}

impl SoftDeleteReconciler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        hook: Arc<dyn RecordingHook>,
        downloads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            hook,
            downloads_dir: downloads_dir.into(),
        }
    }

    async fn target_tasks(&self, target: &DeletionTarget) -> DownloadResult<Vec<DownloadTask>> {
        match target {
            DeletionTarget::Task(id) => self
                .store
                .get(id)
                .await?
                .map(|task| vec![task])
                .ok_or_else(|| DownloadError::task_not_found(id)),
            DeletionTarget::Recording(recording_id) => {
                Ok(self.store.list_by_recording(recording_id).await?)
            }
        }
    }

    /// Flag the target's tasks for deletion at `now`.
    ///
    /// Tasks that are already marked keep their original timestamp, so a
    /// repeated mark never extends the grace period. Returns the ids newly
    /// marked.
    pub async fn mark_for_deletion(
        &self,
        target: &DeletionTarget,
        now: DateTime<Utc>,
    ) -> DownloadResult<Vec<TaskId>> {
        let tasks = self.target_tasks(target).await?;
        let mut marked = Vec::new();

        for task in tasks.iter().filter(|t| !t.is_marked_for_deletion) {
            self.store
                .set_deletion_mark(&task.id, Some(now), None)
                .await?;
            marked.push(task.id.clone());
        }

        if let DeletionTarget::Recording(recording_id) = target {
            if !tasks.is_empty() {
                self.hook.on_recording_marked_for_deletion(recording_id).await;
            }
        }

        tracing::info!(
            target: "tapedeck.download",
            deletion_target = %target,
            marked = marked.len(),
            "Marked for deletion"
        );

        Ok(marked)
    }

    /// Clear the deletion mark on the target's tasks.
    ///
    /// Refreshes `last_access_timestamp`. Returns the ids that were restored.
    pub async fn restore(
        &self,
        target: &DeletionTarget,
        now: DateTime<Utc>,
    ) -> DownloadResult<Vec<TaskId>> {
        let tasks = self.target_tasks(target).await?;
        let mut restored = Vec::new();

        for task in tasks.iter().filter(|t| t.is_marked_for_deletion) {
            self.store
                .set_deletion_mark(&task.id, None, Some(now))
                .await?;
            restored.push(task.id.clone());
        }

        if let DeletionTarget::Recording(recording_id) = target {
            if !restored.is_empty() {
                self.hook.on_recording_restored(recording_id).await;
            }
        }

        tracing::info!(
            target: "tapedeck.download",
            deletion_target = %target,
            restored = restored.len(),
            "Restored from deletion"
        );

        Ok(restored)
    }

    /// Marked tasks whose grace period has elapsed at `now`.
    ///
    /// A mark exactly `grace` old is expired; anything younger is kept.
    pub async fn expired(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> DownloadResult<Vec<DownloadTask>> {
        let marked = self.store.list_marked_for_deletion().await?;
        Ok(marked
            .into_iter()
            .filter(|task| {
                task.deletion_timestamp
                    .is_some_and(|marked_at| now - marked_at >= grace)
            })
            .collect())
    }

    /// Physically remove every expired task: file first, then record.
    ///
    /// File errors are counted and logged but do not stop the sweep. A
    /// missing file counts as already removed.
    pub async fn cleanup(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> DownloadResult<CleanupReport> {
        let expired = self.expired(now, grace).await?;
        let mut report = CleanupReport::default();
        let mut touched_recordings = BTreeSet::new();
        let mut touched_dirs = BTreeSet::new();

        for task in expired {
            let path = self.file_path_for(&task);

            match remove_file(&path).await {
                Ok(freed) => report.bytes_freed += freed,
                Err(e) => {
                    report.file_errors += 1;
                    tracing::warn!(
                        target: "tapedeck.download",
                        id = %task.id,
                        path = %path.display(),
                        error = %e,
                        "Failed to delete file during cleanup"
                    );
                }
            }

            match self.store.delete(&task.id).await {
                Ok(_) => {
                    report.removed.push(task.id.clone());
                    touched_recordings.insert(task.recording_id.clone());
                    if let Some(parent) = path.parent() {
                        touched_dirs.insert(parent.to_path_buf());
                    }
                }
                Err(e) => {
                    report.record_errors += 1;
                    tracing::warn!(
                        target: "tapedeck.download",
                        id = %task.id,
                        error = %e,
                        "Failed to remove task record during cleanup"
                    );
                }
            }
        }

        for dir in &touched_dirs {
            self.prune_if_empty(dir).await;
        }

        for recording_id in touched_recordings {
            if self.store.list_by_recording(&recording_id).await?.is_empty() {
                self.hook.on_recording_purged(&recording_id).await;
                report.purged_recordings.push(recording_id);
            }
        }

        tracing::info!(
            target: "tapedeck.download",
            removed = report.removed.len(),
            file_errors = report.file_errors,
            bytes_freed = report.bytes_freed,
            "Cleanup sweep finished"
        );

        Ok(report)
    }

    /// Where a task's bytes live: its recorded path, or the planned
    /// destination for a task that never completed.
    fn file_path_for(&self, task: &DownloadTask) -> PathBuf {
        task.local_path.clone().unwrap_or_else(|| {
            DownloadDestination::plan(&self.downloads_dir, &task.recording_id, &task.track_filename)
                .file_path()
        })
    }

    /// Remove an emptied recording directory, never the downloads root.
    async fn prune_if_empty(&self, dir: &Path) {
        if dir == self.downloads_dir || !dir.starts_with(&self.downloads_dir) {
            return;
        }
        // remove_dir fails on non-empty directories, which is the check
        if tokio::fs::remove_dir(dir).await.is_ok() {
            tracing::debug!(
                target: "tapedeck.download",
                path = %dir.display(),
                "Pruned empty recording directory"
            );
        }
    }
}

/// Delete a file, returning its size. A missing file frees nothing.
async fn remove_file(path: &Path) -> std::io::Result<u64> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(size),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}
