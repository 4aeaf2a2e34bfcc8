//! Mutating operations of the download manager.
//!
//! Every operation writes the store first and only then touches in-flight
//! transfers, so a late callback from a cancelled transfer always finds the
//! record already moved and commits nothing.

use chrono::{DateTime, Duration, Utc};

use tapedeck_core::download::retry::{RetryDecision, RetryKind, decide};
use tapedeck_core::ports::StatusUpdate;
use tapedeck_core::{
    DeletionTarget, DownloadError, DownloadEvent, DownloadResult, DownloadTask, TaskId,
    TaskStatus, TrackFile,
};

use super::DownloadManagerImpl;
use crate::queue::reorder_priorities;
use crate::reconciler::CleanupReport;

impl DownloadManagerImpl {
    /// Queue the given tracks of a recording at default priority.
    ///
    /// See [`Self::enqueue_with_priority`].
    pub async fn enqueue(&self, recording_id: &str, files: &[TrackFile]) -> DownloadResult<Vec<TaskId>> {
        self.enqueue_with_priority(recording_id, files, 0).await
    }

    /// Queue the given tracks of a recording.
    ///
    /// Idempotent per `(recording_id, filename)`: a track that already has a
    /// live record is left alone (its progress is never reset). Only a
    /// previously cancelled or unknown track gets a fresh record with a new
    /// enqueue position and a zero retry count. Returns the task ids in
    /// input order.
    pub async fn enqueue_with_priority(
        &self,
        recording_id: &str,
        files: &[TrackFile],
        priority: i32,
    ) -> DownloadResult<Vec<TaskId>> {
        let mut ids = Vec::with_capacity(files.len());
        let mut queued_any = false;

        {
            let _guard = self.enqueue_lock.lock().await;
            let now = Utc::now();

            for file in files {
                let id = TaskId::derive(recording_id, &file.filename);

                match self.store.get(&id).await? {
                    Some(existing) if existing.status != TaskStatus::Cancelled => {
                        if existing.is_marked_for_deletion {
                            self.store.set_deletion_mark(&id, None, Some(now)).await?;
                            tracing::info!(
                                target: "tapedeck.download",
                                id = %id,
                                "Enqueue restored a track marked for deletion"
                            );
                        }
                        tracing::debug!(
                            target: "tapedeck.download",
                            id = %id,
                            status = %existing.status,
                            "Track already known; keeping existing record"
                        );
                    }
                    previous => {
                        if let Some(cancelled) = &previous {
                            self.discard_partial_file(cancelled).await;
                        }

                        let seq = self.store.next_enqueue_seq().await?;
                        let task = DownloadTask::queued(recording_id, file, priority, seq, now);
                        self.store.upsert(&task).await?;
                        queued_any = true;

                        tracing::info!(
                            target: "tapedeck.download",
                            id = %id,
                            recording = %recording_id,
                            track = %file.filename,
                            priority,
                            "Download queued"
                        );
                        self.event_emitter.emit(DownloadEvent::TaskQueued {
                            id: id.to_string(),
                            recording_id: recording_id.to_string(),
                            priority,
                        });
                    }
                }

                ids.push(id);
            }
        }

        if queued_any {
            self.groups.lock().await.reopen(recording_id);
            self.notify();
        }

        Ok(ids)
    }

    /// Resolve a recording through the catalog, narrow it by format
    /// preference, and queue the result.
    pub async fn enqueue_recording(
        &self,
        recording_id: &str,
        preferences: &[String],
    ) -> DownloadResult<Vec<TaskId>> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| DownloadError::resolution_failed("no catalog resolver configured"))?;

        let candidates = catalog.resolve(recording_id).await?;
        let candidate_count = candidates.len();
        let chosen = self.format_filter.filter(candidates, preferences);

        if chosen.is_empty() {
            return Err(DownloadError::resolution_failed(format!(
                "none of the {candidate_count} files of {recording_id} match the format preferences"
            )));
        }

        tracing::info!(
            target: "tapedeck.download",
            recording = %recording_id,
            candidates = candidate_count,
            chosen = chosen.len(),
            "Resolved recording"
        );

        self.enqueue(recording_id, &chosen).await
    }

    /// Apply a status change, treating "already there" as a no-op.
    ///
    /// Returns the updated task, or `None` if the task was already in the
    /// target status. Any other mismatch is an `InvalidTransition`.
    async fn move_task(
        &self,
        id: &TaskId,
        allowed_from: &[TaskStatus],
        update: StatusUpdate,
    ) -> DownloadResult<Option<DownloadTask>> {
        let to = update.status;
        if let Some(task) = self.store.transition(id, allowed_from, update).await? {
            return Ok(Some(task));
        }

        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| DownloadError::task_not_found(id))?;
        if current.status == to {
            return Ok(None);
        }
        Err(DownloadError::invalid_transition(id, current.status, to))
    }

    /// Pause a queued or running task. A running transfer is stopped; the
    /// bytes on disk are kept for resume.
    pub async fn pause(&self, id: &TaskId) -> DownloadResult<()> {
        let moved = self
            .move_task(
                id,
                &[TaskStatus::Queued, TaskStatus::Downloading],
                StatusUpdate::to(TaskStatus::Paused),
            )
            .await?;
        if moved.is_none() {
            return Ok(());
        }

        let was_running = self.cancel_active(id).await;
        tracing::info!(target: "tapedeck.download", id = %id, was_running, "Download paused");
        self.event_emitter
            .emit(DownloadEvent::TaskPaused { id: id.to_string() });
        self.notify();
        Ok(())
    }

    /// Put a paused task back in the queue, keeping its progress.
    pub async fn resume(&self, id: &TaskId) -> DownloadResult<()> {
        let moved = self
            .move_task(id, &[TaskStatus::Paused], StatusUpdate::to(TaskStatus::Queued))
            .await?;
        if let Some(task) = moved {
            self.groups.lock().await.reopen(&task.recording_id);
            tracing::info!(target: "tapedeck.download", id = %id, "Download resumed");
            self.event_emitter
                .emit(DownloadEvent::TaskResumed { id: id.to_string() });
            self.notify();
        }
        Ok(())
    }

    /// Cancel a queued, running or paused task.
    pub async fn cancel(&self, id: &TaskId) -> DownloadResult<()> {
        self.cancel_task(id).await.map(|_| ())
    }

    async fn cancel_task(&self, id: &TaskId) -> DownloadResult<bool> {
        let moved = self
            .move_task(
                id,
                &[
                    TaskStatus::Queued,
                    TaskStatus::Downloading,
                    TaskStatus::Paused,
                ],
                StatusUpdate::to(TaskStatus::Cancelled),
            )
            .await?;
        if moved.is_none() {
            return Ok(false);
        }

        let was_running = self.cancel_active(id).await;
        tracing::info!(target: "tapedeck.download", id = %id, was_running, "Download cancelled");
        self.event_emitter
            .emit(DownloadEvent::TaskCancelled { id: id.to_string() });
        self.notify();
        Ok(true)
    }

    /// Cancel every unfinished task of a recording.
    ///
    /// Tasks that finish while the loop runs are skipped. Returns the ids
    /// that were cancelled.
    pub async fn cancel_recording(&self, recording_id: &str) -> DownloadResult<Vec<TaskId>> {
        let tasks = self.store.list_by_recording(recording_id).await?;
        let mut cancelled = Vec::new();

        for task in tasks.iter().filter(|t| {
            matches!(
                t.status,
                TaskStatus::Queued | TaskStatus::Downloading | TaskStatus::Paused
            )
        }) {
            match self.cancel_task(&task.id).await {
                Ok(true) => cancelled.push(task.id.clone()),
                Ok(false) | Err(DownloadError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(cancelled)
    }

    /// Remove a task outright: stop its transfer, drop the record, and
    /// delete whatever is on disk. Returns whether a record existed.
    pub async fn delete(&self, id: &TaskId) -> DownloadResult<bool> {
        let Some(task) = self.store.get(id).await? else {
            return Ok(false);
        };

        self.cancel_active(id).await;
        let removed = self.store.delete(id).await?;
        self.discard_partial_file(&task).await;

        if removed {
            tracing::info!(target: "tapedeck.download", id = %id, status = %task.status, "Download removed");
            self.event_emitter
                .emit(DownloadEvent::TaskRemoved { id: id.to_string() });
            self.notify();
        }
        Ok(removed)
    }

    /// Manually retry a failed or cancelled task.
    ///
    /// Progress is reset and the error cleared; the retry count is left
    /// unchanged.
    pub async fn retry_failed_download(&self, id: &TaskId) -> DownloadResult<()> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| DownloadError::task_not_found(id))?;

        match decide(task.status, task.retry_count, RetryKind::Manual) {
            RetryDecision::Requeue { retry_count } => {
                self.requeue(
                    &task,
                    &[TaskStatus::Failed, TaskStatus::Cancelled],
                    retry_count,
                )
                .await?
                .ok_or_else(|| DownloadError::invalid_transition(id, task.status, TaskStatus::Queued))?;
                Ok(())
            }
            RetryDecision::Reject(_) => Err(DownloadError::invalid_transition(
                id,
                task.status,
                TaskStatus::Queued,
            )),
        }
    }

    /// Manually retry every failed task. Returns the ids requeued.
    pub async fn retry_all_failed_downloads(&self) -> DownloadResult<Vec<TaskId>> {
        let failed = self.store.list_by_status(TaskStatus::Failed).await?;
        let mut requeued = Vec::new();

        for task in failed {
            if let RetryDecision::Requeue { retry_count } =
                decide(task.status, task.retry_count, RetryKind::Manual)
            {
                if self
                    .requeue(&task, &[TaskStatus::Failed], retry_count)
                    .await?
                    .is_some()
                {
                    requeued.push(task.id);
                }
            }
        }

        tracing::info!(target: "tapedeck.download", count = requeued.len(), "Retried all failed downloads");
        Ok(requeued)
    }

    /// Automatic retry under an explicit budget.
    ///
    /// Every failed task with `retry_count < max_retries` whose backoff has
    /// elapsed goes back to the queue with its count incremented; the rest
    /// stay failed. Returns the ids requeued.
    pub async fn auto_retry_downloads(&self, max_retries: u32) -> DownloadResult<Vec<TaskId>> {
        let now = Utc::now();
        let failed = self.store.list_by_status(TaskStatus::Failed).await?;
        let mut requeued = Vec::new();

        for task in failed {
            if !self.config.retry.is_due(task.retry_count, task.updated_at, now) {
                continue;
            }
            if self.apply_retry_policy(&task, max_retries).await?.is_some() {
                requeued.push(task.id);
            }
        }

        Ok(requeued)
    }

    /// Run the automatic policy for one failed task.
    ///
    /// Returns the new retry count if the task was requeued.
    pub(super) async fn apply_retry_policy(
        &self,
        task: &DownloadTask,
        max_retries: u32,
    ) -> DownloadResult<Option<u32>> {
        match decide(
            task.status,
            task.retry_count,
            RetryKind::Automatic { max_retries },
        ) {
            RetryDecision::Requeue { retry_count } => Ok(self
                .requeue(task, &[TaskStatus::Failed], retry_count)
                .await?
                .map(|_| retry_count)),
            RetryDecision::Reject(reason) => {
                tracing::debug!(
                    target: "tapedeck.download",
                    id = %task.id,
                    reason = ?reason,
                    "Automatic retry declined"
                );
                Ok(None)
            }
        }
    }

    /// Reorder the queue: the first id gets the highest priority.
    ///
    /// Running tasks keep running; the new order applies from the next
    /// admission pass.
    pub async fn reorder_queue(&self, ordered: &[TaskId]) -> DownloadResult<()> {
        for (id, priority) in reorder_priorities(ordered) {
            self.store.set_priority(&id, priority).await?;
        }
        tracing::info!(target: "tapedeck.download", count = ordered.len(), "Queue reordered");
        self.notify();
        Ok(())
    }

    /// Delete every queued task and any partial file it left behind.
    /// Returns how many were removed.
    ///
    /// A task admitted between the listing and its removal is left alone.
    pub async fn clear_queue(&self) -> DownloadResult<usize> {
        let queued = self.store.list_by_status(TaskStatus::Queued).await?;
        let mut removed = 0;

        for task in queued {
            let Some(task) = self.store.delete_if(&task.id, &[TaskStatus::Queued]).await? else {
                tracing::debug!(target: "tapedeck.download", id = %task.id, "Left the queue before it was cleared");
                continue;
            };
            self.discard_partial_file(&task).await;
            removed += 1;
            self.event_emitter.emit(DownloadEvent::TaskRemoved {
                id: task.id.to_string(),
            });
        }

        tracing::info!(target: "tapedeck.download", removed, "Queue cleared");
        Ok(removed)
    }

    /// Change one task's priority.
    pub async fn set_priority(&self, id: &TaskId, priority: i32) -> DownloadResult<()> {
        self.store.set_priority(id, priority).await?;
        self.notify();
        Ok(())
    }

    /// Soft-delete a task or a whole recording.
    ///
    /// Nothing is removed yet; the mark can be undone with `restore` until
    /// the grace period elapses. Returns the ids newly marked.
    pub async fn mark_for_deletion(&self, target: &DeletionTarget) -> DownloadResult<Vec<TaskId>> {
        let marked = self
            .reconciler
            .mark_for_deletion(target, Utc::now())
            .await?;
        self.event_emitter.emit(DownloadEvent::MarkedForDeletion {
            target: target.to_string(),
            affected: marked.len(),
        });
        Ok(marked)
    }

    /// Undo a soft delete. Returns the ids restored.
    pub async fn restore(&self, target: &DeletionTarget) -> DownloadResult<Vec<TaskId>> {
        let restored = self.reconciler.restore(target, Utc::now()).await?;
        self.event_emitter.emit(DownloadEvent::Restored {
            target: target.to_string(),
            affected: restored.len(),
        });
        if !restored.is_empty() {
            // Restored queued tasks are admissible again
            self.notify();
        }
        Ok(restored)
    }

    /// Purge soft-deleted tasks whose mark is at least `grace` old at `now`.
    ///
    /// Transfers still running for those tasks are stopped first.
    pub async fn cleanup(&self, now: DateTime<Utc>, grace: Duration) -> DownloadResult<CleanupReport> {
        for task in self.reconciler.expired(now, grace).await? {
            if self.cancel_active(&task.id).await {
                tracing::debug!(
                    target: "tapedeck.download",
                    id = %task.id,
                    "Stopped transfer of a task being purged"
                );
            }
        }

        let report = self.reconciler.cleanup(now, grace).await?;

        {
            let mut groups = self.groups.lock().await;
            for recording_id in &report.purged_recordings {
                groups.reopen(recording_id);
            }
        }

        self.event_emitter.emit(DownloadEvent::CleanupCompleted {
            removed: report.removed.len(),
            file_errors: report.file_errors,
            bytes_freed: report.bytes_freed,
        });
        if !report.removed.is_empty() {
            self.notify();
        }
        Ok(report)
    }

    /// Purge with the configured grace period.
    pub async fn cleanup_expired(&self) -> DownloadResult<CleanupReport> {
        self.cleanup(Utc::now(), self.config.grace_period()).await
    }
}
