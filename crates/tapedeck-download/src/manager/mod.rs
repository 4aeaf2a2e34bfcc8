//! The queue scheduler: a long-lived runner that admits
//! queued tasks under the concurrency, network and storage budgets, spawns
//! one transfer per admitted task, and commits each outcome back into the
//! task store behind a lease check.
//!
//! # Architecture
//!
//! - **Manager**: Owns the runner, the lease map and the group tracker
//! - **Worker**: Executes one transfer, writes only to `watch::Sender`
//! - **Bridge tasks**: Subscribe to watch channels, persist throttled
//!   checkpoints and emit progress events
//!
//! # Concurrency Model
//!
//! - Single long-lived runner (never resets `runner_started`); it is the only
//!   place that admits work, so admission never races with itself
//! - `Notify` for wake-on-work, plus a periodic maintenance tick
//! - The running count comes from the store (`Downloading` rows), so a
//!   pause or cancel frees its slot as soon as the store write lands
//! - A transfer commits its outcome only while its lease is current
//! - Lock order: active → groups (consistent everywhere)

mod commands;
mod group_tracker;
mod paths;
mod queries;
mod worker;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use tapedeck_core::download::types::progress_fraction;
use tapedeck_core::ports::{
    CatalogResolver, DownloadEventEmitterPort, FormatFilter, NetworkPolicy, RecordingHook,
    RepositoryError, StatusUpdate, StorageProbe, TaskStore, TransferClient, TransferProgress,
};
use tapedeck_core::{
    DownloadError, DownloadEvent, DownloadResult, DownloadTask, QueueConfig, RecordingStatus,
    TaskId, TaskStatus,
};

use crate::progress::{ProgressThrottle, SpeedEstimator};
use crate::queue::{admission_candidates, free_slots};
use crate::reconciler::SoftDeleteReconciler;
use crate::storage::StorageAdmission;

use group_tracker::RecordingGroupTracker;
use worker::{CompletedJob, DownloadJob, WorkerDeps};

pub use paths::DownloadDestination;

/// How often a progress bridge samples its watch channel.
const BRIDGE_TICK: Duration = Duration::from_millis(250);

/// Identifies one admission of a task.
///
/// Prevents stale finalize commits when a download is paused,
/// cancelled or re-admitted while an older transfer is still unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LeaseId(u64);

/// Bookkeeping for a transfer in flight.
struct ActiveJob {
    /// Lease taken at admission.
    lease: LeaseId,
    /// Cancellation token.
    cancel: CancellationToken,
}

/// Everything `build_download_manager` wires together.
pub struct DownloadManagerDeps {
    /// Durable task records.
    pub store: Arc<dyn TaskStore>,
    /// Moves the bytes.
    pub transfer: Arc<dyn TransferClient>,
    /// Live free-space figures for the downloads volume.
    pub storage: Arc<dyn StorageProbe>,
    /// Gate consulted before every admission pass.
    pub network: Arc<dyn NetworkPolicy>,
    /// Resolves recordings into candidate files (for `enqueue_recording`).
    pub catalog: Option<Arc<dyn CatalogResolver>>,
    /// Narrows candidates by format preference.
    pub format_filter: Arc<dyn FormatFilter>,
    /// Notified on recording-level lifecycle changes.
    pub hook: Arc<dyn RecordingHook>,
    /// Sink for queue events.
    pub event_emitter: Arc<dyn DownloadEventEmitterPort>,
    /// Validated before the manager is built.
    pub config: QueueConfig,
}

/// Validate the configuration and assemble a manager.
///
/// The runner is not started; call `start` on the shared handle.
pub fn build_download_manager(deps: DownloadManagerDeps) -> DownloadResult<DownloadManagerImpl> {
    deps.config.validate()?;
    Ok(DownloadManagerImpl::new(deps))
}

/// Download queue and lifecycle manager.
///
/// Share it as `Arc<DownloadManagerImpl>`; `start` needs the `Arc` to spawn
/// the runner.
pub struct DownloadManagerImpl {
    store: Arc<dyn TaskStore>,
    transfer: Arc<dyn TransferClient>,
    storage: StorageAdmission,
    network: Arc<dyn NetworkPolicy>,
    catalog: Option<Arc<dyn CatalogResolver>>,
    format_filter: Arc<dyn FormatFilter>,
    hook: Arc<dyn RecordingHook>,
    event_emitter: Arc<dyn DownloadEventEmitterPort>,
    reconciler: SoftDeleteReconciler,
    config: QueueConfig,
    /// Active downloads (keyed by task ID).
    active: Mutex<HashMap<TaskId, ActiveJob>>,
    /// Recordings whose completion has been announced.
    groups: Mutex<RecordingGroupTracker>,
    /// Serializes enqueues so `enqueue_seq` stays unique.
    enqueue_lock: Mutex<()>,
    /// Source of fresh `LeaseId`s.
    lease_counter: AtomicU64,
    /// Wakes the runner when an operation may have freed a slot or queued work.
    queue_notify: Notify,
    /// Set once by `ensure_runner`; never cleared.
    runner_started: AtomicBool,
    /// Free space was below the threshold at the last pass.
    storage_low: AtomicBool,
    /// Stops the runner.
    shutdown: CancellationToken,
}

impl DownloadManagerImpl {
    fn new(deps: DownloadManagerDeps) -> Self {
        let reconciler = SoftDeleteReconciler::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.hook),
            deps.config.downloads_directory.clone(),
        );

        Self {
            store: deps.store,
            transfer: deps.transfer,
            storage: StorageAdmission::new(deps.storage),
            network: deps.network,
            catalog: deps.catalog,
            format_filter: deps.format_filter,
            hook: deps.hook,
            event_emitter: deps.event_emitter,
            reconciler,
            config: deps.config,
            active: Mutex::new(HashMap::new()),
            groups: Mutex::new(RecordingGroupTracker::new()),
            enqueue_lock: Mutex::new(()),
            lease_counter: AtomicU64::new(0),
            queue_notify: Notify::new(),
            runner_started: AtomicBool::new(false),
            storage_low: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// The configuration the manager runs with.
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Recover from an unclean stop, then start the runner.
    ///
    /// Every `Downloading` record is reset to `Queued` (progress kept)
    /// because no transfer survives a restart. Returns the reset ids.
    pub async fn start(self: &Arc<Self>) -> DownloadResult<Vec<TaskId>> {
        let reset = self.store.reset_interrupted().await?;
        if !reset.is_empty() {
            tracing::info!(
                target: "tapedeck.download",
                count = reset.len(),
                "Reset interrupted downloads to queued"
            );
        }

        self.ensure_runner();
        self.notify();
        Ok(reset)
    }

    /// Ask the runner for an admission pass.
    pub fn notify(&self) {
        self.queue_notify.notify_one();
    }

    /// Stop the runner and cancel every in-flight transfer.
    ///
    /// Interrupted tasks stay `Downloading` in the store and are reset by
    /// the next `start`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let active = self.active.lock().await;
        for job in active.values() {
            job.cancel.cancel();
        }
        tracing::info!(
            target: "tapedeck.download",
            count = active.len(),
            "Download manager shut down"
        );
    }

    /// Cancel every transfer without waiting.
    ///
    /// Synchronous variant of `shutdown` for signal handlers and `Drop`
    /// paths. Returns the number of transfers cancelled.
    pub fn shutdown_cleanup(&self) -> usize {
        self.shutdown.cancel();
        // We can't block on tokio::sync::Mutex here, so use try_lock
        self.active.try_lock().map_or_else(
            |_| {
                tracing::warn!(
                    target: "tapedeck.download",
                    "Shutdown cleanup: couldn't acquire lock"
                );
                0
            },
            |active| {
                let count = active.len();
                for job in active.values() {
                    job.cancel.cancel();
                }
                tracing::info!(
                    target: "tapedeck.download",
                    count,
                    "Shutdown cleanup: cancelled download tokens"
                );
                count
            },
        )
    }

    /// Spawn the runner unless it is already running.
    ///
    /// Later calls are no-ops. The runner lives until `shutdown`.
    pub fn ensure_runner(self: &Arc<Self>) {
        if self
            .runner_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.run_loop().await;
            });
        }
    }

    /// The main runner loop.
    ///
    /// Runs an admission pass, then sleeps until notified, the maintenance
    /// tick fires, or the manager shuts down.
    async fn run_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.maintenance_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; startup already recovered
        tick.tick().await;

        loop {
            self.admission_pass().await;

            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                () = self.queue_notify.notified() => {}

                _ = tick.tick() => self.maintenance().await,
            }
        }

        tracing::debug!(target: "tapedeck.download", "Runner stopped");
    }

    /// Admit as many queued tasks as the budgets allow.
    async fn admission_pass(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if !self.network.can_transfer_now() {
            tracing::debug!(target: "tapedeck.download", "Network policy blocks transfers");
            return;
        }

        // One probe per pass; every candidate is judged against this figure
        let available = self.check_low_space(self.storage.read_available().await).await;

        let running = match self.store.count_by_status(TaskStatus::Downloading).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(target: "tapedeck.download", error = %e, "Admission skipped");
                return;
            }
        };
        let mut slots = free_slots(self.config.max_concurrent, running);
        if slots == 0 {
            return;
        }

        let queued = match self.store.list_by_status(TaskStatus::Queued).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!(target: "tapedeck.download", error = %e, "Admission skipped");
                return;
            }
        };

        // Space promised to tasks admitted earlier in this pass
        let mut reserved = 0u64;

        for task in admission_candidates(queued) {
            if slots == 0 {
                break;
            }

            let required = task.remaining_bytes().unwrap_or(0);
            if let Err(e) = StorageAdmission::fits(available, required.saturating_add(reserved)) {
                tracing::debug!(
                    target: "tapedeck.download",
                    id = %task.id,
                    required,
                    reason = %e,
                    "Not enough space; task stays queued"
                );
                continue;
            }

            let update = StatusUpdate::to(TaskStatus::Downloading)
                .with_started_at(Some(Utc::now()))
                .with_error(None);
            match self
                .store
                .transition(&task.id, &[TaskStatus::Queued], update)
                .await
            {
                Ok(Some(admitted)) => {
                    reserved = reserved.saturating_add(required);
                    slots -= 1;
                    self.launch(admitted).await;
                }
                Ok(None) => {
                    tracing::debug!(target: "tapedeck.download", id = %task.id, "Lost admission race");
                }
                Err(e) => {
                    tracing::warn!(
                        target: "tapedeck.download",
                        id = %task.id,
                        error = %e,
                        "Could not admit task"
                    );
                }
            }
        }
    }

    /// Emit `StorageLow` when free space crosses below the threshold.
    ///
    /// Returns the free-space figure admission should use: the one passed
    /// in, or a fresh reading when a low-space cleanup removed files.
    async fn check_low_space(&self, available: Option<u64>) -> Option<u64> {
        let threshold = self.config.low_space_threshold_bytes;
        let Some(available) = available.filter(|bytes| *bytes < threshold) else {
            self.storage_low.store(false, Ordering::SeqCst);
            return available;
        };
        if self.storage_low.swap(true, Ordering::SeqCst) {
            return Some(available);
        }

        tracing::warn!(
            target: "tapedeck.download",
            available,
            threshold,
            "Free space below threshold"
        );
        self.event_emitter
            .emit(DownloadEvent::StorageLow { available, threshold });

        if let Some(grace) = self.config.low_space_cleanup_grace() {
            match self.cleanup(Utc::now(), grace).await {
                Ok(report) if report.bytes_freed > 0 => return self.storage.read_available().await,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "tapedeck.download", error = %e, "Low-space cleanup failed");
                }
            }
        }
        Some(available)
    }

    /// Register a lease and spawn the transfer for an admitted task.
    async fn launch(self: &Arc<Self>, task: DownloadTask) {
        let lease = LeaseId(self.lease_counter.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();

        self.active.lock().await.insert(
            task.id.clone(),
            ActiveJob {
                lease,
                cancel: cancel.clone(),
            },
        );

        tracing::info!(
            target: "tapedeck.download",
            id = %task.id,
            recording = %task.recording_id,
            track = %task.track_filename,
            priority = task.priority,
            "Download started"
        );
        self.event_emitter.emit(DownloadEvent::TaskStarted {
            id: task.id.to_string(),
        });

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.execute(task, lease, cancel).await;
        });
    }

    /// Run one transfer and commit its outcome.
    async fn execute(self: Arc<Self>, task: DownloadTask, lease: LeaseId, cancel: CancellationToken) {
        let (progress_tx, progress_rx) = watch::channel(TransferProgress::new(
            task.bytes_downloaded,
            task.total_bytes,
            0,
        ));
        let abort = Arc::new(OnceLock::new());
        let bridge = self.spawn_progress_bridge(&task, progress_rx, cancel.clone(), Arc::clone(&abort));

        let job = DownloadJob {
            id: task.id.clone(),
            url: task.source_url.clone(),
            destination: DownloadDestination::plan(
                &self.config.downloads_directory,
                &task.recording_id,
                &task.track_filename,
            ),
            expected_size: task.total_bytes,
            cancel,
            progress_tx,
        };
        let deps = WorkerDeps {
            transfer: Arc::clone(&self.transfer),
        };

        let result = worker::run_job(job, &deps).await;

        // The bridge exits once the worker dropped its sender
        if let Err(e) = bridge.await {
            tracing::debug!(target: "tapedeck.download", id = %task.id, error = %e, "Progress bridge ended abnormally");
        }

        // A cancel the bridge issued itself carries its own reason
        let result = match (result, abort.get()) {
            (Err(DownloadError::Cancelled), Some(reason)) => Err(reason.clone()),
            (result, _) => result,
        };

        self.finalize_job(&task, lease, result).await;
        self.queue_notify.notify_one();
    }

    /// Spawn a progress bridge task that checkpoints and emits progress.
    ///
    /// When the size was unknown at admission, the first reported total is
    /// checked against free space; if it does not fit, the transfer is
    /// aborted with `InsufficientStorage` recorded in `abort`.
    fn spawn_progress_bridge(
        &self,
        task: &DownloadTask,
        mut rx: watch::Receiver<TransferProgress>,
        cancel: CancellationToken,
        abort: Arc<OnceLock<DownloadError>>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let event_emitter = Arc::clone(&self.event_emitter);
        let storage = self.storage.clone();
        let checkpoint = self.config.progress_checkpoint();
        let id = task.id.clone();
        let mut size_checked = task.total_bytes.is_some();

        tokio::spawn(async move {
            let mut tick = interval(BRIDGE_TICK);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut throttle = ProgressThrottle::new(checkpoint);
            let mut speed = SpeedEstimator::new(rx.borrow().downloaded);
            let mut last_emitted = 0u64;
            let mut last_persisted = 0u64;
            let mut closed = false;

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    result = rx.changed() => {
                        if result.is_err() {
                            closed = true;
                            break;
                        }
                        // Picked up on the next tick
                    }

                    _ = tick.tick() => {
                        let current = rx.borrow().clone();
                        if current.seq > last_emitted {
                            if !size_checked {
                                if let Some(total) = current.total {
                                    size_checked = true;
                                    let required = total.saturating_sub(current.downloaded);
                                    let available = storage.read_available().await;
                                    if let Err(e) = StorageAdmission::fits(available, required) {
                                        tracing::warn!(
                                            target: "tapedeck.download",
                                            id = %id,
                                            total,
                                            "Reported size does not fit; aborting"
                                        );
                                        let _ = abort.set(e);
                                        cancel.cancel();
                                        break;
                                    }
                                }
                            }

                            let bps = speed.update(current.downloaded);
                            event_emitter.emit(DownloadEvent::progress(
                                id.as_str(),
                                current.downloaded,
                                current.total,
                                bps,
                            ));
                            last_emitted = current.seq;

                            if throttle.ready() {
                                persist_checkpoint(store.as_ref(), &id, &current).await;
                                last_persisted = current.seq;
                            }
                        }
                    }
                }
            }

            // Final checkpoint so paused or failed tasks keep accurate counters
            let last = rx.borrow().clone();
            if last.seq > last_persisted {
                persist_checkpoint(store.as_ref(), &id, &last).await;
            }
            if closed && last.seq > last_emitted {
                let bps = speed.update(last.downloaded);
                event_emitter.emit(DownloadEvent::progress(
                    id.as_str(),
                    last.downloaded,
                    last.total,
                    bps,
                ));
            }
        })
    }

    /// Commit the outcome of a finished transfer.
    ///
    /// The store is updated while the lease is still held, so the
    /// maintenance tick never sees the task as stranded mid-commit.
    async fn finalize_job(
        &self,
        task: &DownloadTask,
        lease: LeaseId,
        result: Result<CompletedJob, DownloadError>,
    ) {
        if !self.holds_lease(&task.id, lease).await {
            tracing::debug!(
                target: "tapedeck.download",
                id = %task.id,
                "Ignoring stale finalize (lease mismatch)"
            );
            return;
        }

        match result {
            Ok(completed) => self.handle_success(task, completed).await,
            Err(DownloadError::Cancelled) => self.handle_cancellation(task).await,
            Err(e) => self.handle_failure(task, e).await,
        }

        self.release_lease(&task.id, lease).await;
    }

    async fn holds_lease(&self, id: &TaskId, lease: LeaseId) -> bool {
        self.active
            .lock()
            .await
            .get(id)
            .is_some_and(|job| job.lease == lease)
    }

    /// Remove the active entry if it still belongs to `lease`.
    async fn release_lease(&self, id: &TaskId, lease: LeaseId) -> bool {
        let mut active = self.active.lock().await;
        active
            .get(id)
            .is_some_and(|job| job.lease == lease)
            .then(|| active.remove(id))
            .is_some()
    }

    /// Drop the active entry for a task and cancel its transfer.
    ///
    /// Returns whether a transfer was running.
    async fn cancel_active(&self, id: &TaskId) -> bool {
        let Some(job) = self.active.lock().await.remove(id) else {
            return false;
        };
        job.cancel.cancel();
        true
    }

    /// Record the file, emit `TaskCompleted`, and check the recording.
    async fn handle_success(&self, task: &DownloadTask, completed: CompletedJob) {
        let now = Utc::now();

        // Record the real size before the status flips
        persist_checkpoint(
            self.store.as_ref(),
            &task.id,
            &TransferProgress::new(completed.bytes, Some(completed.bytes), 0),
        )
        .await;

        let update = StatusUpdate::to(TaskStatus::Completed)
            .with_local_path(Some(completed.path.clone()))
            .with_completed_at(Some(now))
            .with_error(None)
            .with_resumed_from(completed.resumed_from)
            .completing()
            .accessed(now);

        let outcome = retry_once("complete", || {
            self.store
                .transition(&task.id, &[TaskStatus::Downloading], update.clone())
        })
        .await;

        match outcome {
            Ok(Some(done)) => {
                tracing::info!(
                    target: "tapedeck.download",
                    id = %task.id,
                    path = %completed.path.display(),
                    bytes = completed.bytes,
                    "Download completed"
                );
                self.event_emitter.emit(DownloadEvent::TaskCompleted {
                    id: task.id.to_string(),
                    local_path: completed.path.display().to_string(),
                });
                self.check_group_completion(&done.recording_id).await;
            }
            Ok(None) => {
                tracing::debug!(
                    target: "tapedeck.download",
                    id = %task.id,
                    "Status changed while finishing; leaving it"
                );
            }
            Err(e) => self.log_store_error(&task.id, "complete", &e),
        }
    }

    /// Fire the recording completion hook once per completion episode.
    async fn check_group_completion(&self, recording_id: &str) {
        let tasks = match self.store.list_by_recording(recording_id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!(
                    target: "tapedeck.download",
                    recording = %recording_id,
                    error = %e,
                    "Group completion check failed"
                );
                return;
            }
        };

        let status = RecordingStatus::from_tasks(recording_id, &tasks);
        let fire = self.groups.lock().await.on_track_completed(&status);
        if !fire {
            return;
        }

        tracing::info!(
            target: "tapedeck.download",
            recording = %recording_id,
            tracks = status.total,
            "Recording complete"
        );
        self.hook
            .on_recording_complete(recording_id, status.total)
            .await;
        self.event_emitter.emit(DownloadEvent::RecordingCompleted {
            recording_id: recording_id.to_string(),
            track_count: status.total,
        });
    }

    /// A transfer stopped without anybody recording why.
    ///
    /// Pause and cancel write the store before cancelling the token, so
    /// this CAS only lands for cancellations nobody recorded.
    async fn handle_cancellation(&self, task: &DownloadTask) {
        if self.shutdown.is_cancelled() {
            tracing::debug!(
                target: "tapedeck.download",
                id = %task.id,
                "Interrupted by shutdown; left for recovery"
            );
            return;
        }

        match self
            .store
            .transition(
                &task.id,
                &[TaskStatus::Downloading],
                StatusUpdate::to(TaskStatus::Cancelled),
            )
            .await
        {
            Ok(Some(_)) => {
                tracing::info!(target: "tapedeck.download", id = %task.id, "Download cancelled");
                self.event_emitter.emit(DownloadEvent::TaskCancelled {
                    id: task.id.to_string(),
                });
            }
            Ok(None) => {}
            Err(e) => self.log_store_error(&task.id, "cancel", &e),
        }
    }

    /// Mark the task failed and let the retry policy decide what follows.
    async fn handle_failure(&self, task: &DownloadTask, error: DownloadError) {
        tracing::warn!(
            target: "tapedeck.download",
            id = %task.id,
            error = %error,
            recoverable = error.is_recoverable(),
            "Download failed"
        );

        let message = error.task_message();
        let update = StatusUpdate::to(TaskStatus::Failed).with_error(Some(message.clone()));
        let outcome = retry_once("fail", || {
            self.store
                .transition(&task.id, &[TaskStatus::Downloading], update.clone())
        })
        .await;

        match outcome {
            Ok(Some(failed)) => {
                self.event_emitter
                    .emit(DownloadEvent::failed(task.id.as_str(), message));

                if self.config.auto_retry_on_failure
                    && self
                        .config
                        .retry
                        .is_due(failed.retry_count, failed.updated_at, Utc::now())
                {
                    if let Err(e) = self.apply_retry_policy(&failed, self.config.retry.max_retries).await {
                        tracing::warn!(
                            target: "tapedeck.download",
                            id = %task.id,
                            error = %e,
                            "Automatic retry failed"
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(e) => self.log_store_error(&task.id, "fail", &e),
        }
    }

    fn log_store_error(&self, id: &TaskId, op: &str, error: &RepositoryError) {
        if matches!(error, RepositoryError::NotFound(_)) {
            tracing::debug!(
                target: "tapedeck.download",
                id = %id,
                op,
                "Task removed while downloading"
            );
        } else {
            tracing::error!(
                target: "tapedeck.download",
                id = %id,
                op,
                error = %error,
                "Could not record download outcome"
            );
        }
    }

    /// Periodic safety net.
    ///
    /// Resets stranded `Downloading` records, applies due automatic
    /// retries when enabled, and purges expired soft-deleted tasks.
    async fn maintenance(&self) {
        match self.reset_stranded().await {
            Ok(reset) if !reset.is_empty() => {
                tracing::info!(
                    target: "tapedeck.download",
                    count = reset.len(),
                    "Reset stranded downloads"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(target: "tapedeck.download", error = %e, "Stranded check failed"),
        }

        if self.config.auto_retry_on_failure {
            if let Err(e) = self.retry_due_failures().await {
                tracing::warn!(target: "tapedeck.download", error = %e, "Automatic retries failed");
            }
        }

        if let Err(e) = self.cleanup_expired().await {
            tracing::warn!(target: "tapedeck.download", error = %e, "Scheduled cleanup failed");
        }
    }

    /// `Downloading` records without a live lease go back to the queue.
    async fn reset_stranded(&self) -> DownloadResult<Vec<TaskId>> {
        let downloading = self.store.list_by_status(TaskStatus::Downloading).await?;
        let mut reset = Vec::new();

        for task in downloading {
            if self.active.lock().await.contains_key(&task.id) {
                continue;
            }
            let update = StatusUpdate::to(TaskStatus::Queued);
            if self
                .store
                .transition(&task.id, &[TaskStatus::Downloading], update)
                .await?
                .is_some()
            {
                reset.push(task.id);
            }
        }

        if !reset.is_empty() {
            self.queue_notify.notify_one();
        }
        Ok(reset)
    }

    /// Automatic retries for failed tasks whose backoff has elapsed.
    async fn retry_due_failures(&self) -> DownloadResult<Vec<TaskId>> {
        let now = Utc::now();
        let failed = self.store.list_by_status(TaskStatus::Failed).await?;
        let mut requeued = Vec::new();

        for task in failed {
            if !self.config.retry.is_due(task.retry_count, task.updated_at, now) {
                continue;
            }
            if self
                .apply_retry_policy(&task, self.config.retry.max_retries)
                .await?
                .is_some()
            {
                requeued.push(task.id);
            }
        }

        Ok(requeued)
    }

    /// Put a task back in the queue: status, retry count, cleared error,
    /// reset progress, and a fresh start for the file on disk.
    async fn requeue(
        &self,
        task: &DownloadTask,
        allowed_from: &[TaskStatus],
        retry_count: u32,
    ) -> DownloadResult<Option<DownloadTask>> {
        let update = StatusUpdate::to(TaskStatus::Queued)
            .with_retry_count(retry_count)
            .with_error(None)
            .with_started_at(None)
            .with_completed_at(None)
            .with_local_path(None)
            .resetting_progress();

        let Some(requeued) = self.store.transition(&task.id, allowed_from, update).await? else {
            return Ok(None);
        };

        self.discard_partial_file(task).await;
        self.groups.lock().await.reopen(&task.recording_id);

        tracing::info!(
            target: "tapedeck.download",
            id = %task.id,
            retry_count,
            "Download requeued"
        );
        self.event_emitter.emit(DownloadEvent::TaskRequeued {
            id: task.id.to_string(),
            retry_count,
        });
        self.queue_notify.notify_one();

        Ok(Some(requeued))
    }

    /// Best-effort removal of whatever an earlier attempt left on disk.
    async fn discard_partial_file(&self, task: &DownloadTask) {
        let path = task.local_path.clone().unwrap_or_else(|| {
            DownloadDestination::plan(
                &self.config.downloads_directory,
                &task.recording_id,
                &task.track_filename,
            )
            .file_path()
        });

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(target: "tapedeck.download", path = %path.display(), "Removed partial file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    target: "tapedeck.download",
                    path = %path.display(),
                    error = %e,
                    "Could not remove partial file"
                );
            }
        }
    }
}

/// Persist a progress checkpoint, logging instead of failing.
async fn persist_checkpoint(store: &dyn TaskStore, id: &TaskId, progress: &TransferProgress) {
    let fraction = progress_fraction(progress.downloaded, progress.total);
    if let Err(e) = store
        .update_progress(id, fraction, progress.downloaded, progress.total)
        .await
    {
        tracing::debug!(
            target: "tapedeck.download",
            id = %id,
            error = %e,
            "Progress checkpoint not persisted"
        );
    }
}

/// Run a store write, retrying once on a storage-level failure.
async fn retry_once<T, F, Fut>(op: &'static str, mut f: F) -> Result<T, RepositoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    match f().await {
        Err(RepositoryError::Storage(message)) => {
            tracing::warn!(
                target: "tapedeck.download",
                op,
                error = %message,
                "Store write failed; retrying once"
            );
            f().await
        }
        other => other,
    }
}
