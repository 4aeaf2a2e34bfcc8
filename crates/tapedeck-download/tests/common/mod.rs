//! Shared fixtures for the download manager integration tests.
//!
//! The transfer client, storage probe and recording hook here are small
//! hand-written fakes: they record what the manager asked for and let a
//! test hold transfers open or make them fail on demand.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use tapedeck_core::{
    AlwaysAllow, DownloadError, DownloadTask, NetworkPolicy, PreferredFormatFilter, QueueConfig,
    RecordingHook, StorageProbe, TaskId, TaskStore, TrackFile, TransferClient, TransferRequest,
};
use tapedeck_db::TestDb;
use tapedeck_download::{
    BroadcastEmitter, DownloadManagerDeps, DownloadManagerImpl, build_download_manager,
};

/// How long a test waits for the queue to reach a state.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Fake transfer client ───────────────────────────────────────────

/// Transfer client that writes `size` bytes of filler per task.
///
/// With a gate, every transfer reports its size, then blocks until the test
/// adds a permit (or the transfer is cancelled).
#[derive(Default)]
pub struct ScriptedTransfer {
    gate: Option<Arc<Semaphore>>,
    /// Total size to announce; `None` writes `DEFAULT_SIZE` without a total.
    announce: Mutex<HashMap<String, u64>>,
    /// Remaining forced failures per URL (`usize::MAX` = always).
    failures: Mutex<HashMap<String, usize>>,
    started: Mutex<Vec<TaskId>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    attempts: AtomicUsize,
}

pub const DEFAULT_SIZE: u64 = 64;

impl ScriptedTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every transfer until `release` is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Let `n` held transfers finish.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Report `total` for transfers of `url` once they start.
    pub fn announce(&self, url: &str, total: u64) {
        self.announce.lock().unwrap().insert(url.to_string(), total);
    }

    /// Fail the next `times` transfers of `url`.
    pub fn fail(&self, url: &str, times: usize) {
        self.failures.lock().unwrap().insert(url.to_string(), times);
    }

    pub fn started(&self) -> Vec<TaskId> {
        self.started.lock().unwrap().clone()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn take_failure(&self, url: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(url) {
            Some(0) | None => false,
            Some(n) => {
                if *n != usize::MAX {
                    *n -= 1;
                }
                true
            }
        }
    }
}

/// Decrements the running counter however the transfer ends.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferClient for ScriptedTransfer {
    async fn transfer(&self, request: TransferRequest) -> Result<PathBuf, DownloadError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(request.task_id.clone());
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let announced = self.announce.lock().unwrap().get(&request.url).copied();
        let size = announced.unwrap_or(DEFAULT_SIZE);
        request.report(request.resume_from, announced);

        if let Some(gate) = &self.gate {
            tokio::select! {
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                () = request.cancel.cancelled() => return Err(DownloadError::Cancelled),
            }
        }

        if self.take_failure(&request.url) {
            return Err(DownloadError::network_with_status("connection reset", 503));
        }

        let len = usize::try_from(size).unwrap();
        std::fs::write(&request.destination, vec![0xAB; len])
            .map_err(|e| DownloadError::from_io_error(&e))?;
        request.report(size, Some(size));
        Ok(request.destination)
    }
}

// ── Fake storage probe ─────────────────────────────────────────────

/// Storage probe with an adjustable free-space figure.
#[derive(Debug)]
pub struct FakeProbe {
    available: AtomicU64,
}

impl FakeProbe {
    pub fn new(available: u64) -> Self {
        Self {
            available: AtomicU64::new(available),
        }
    }

    pub fn set_available(&self, bytes: u64) {
        self.available.store(bytes, Ordering::SeqCst);
    }
}

impl StorageProbe for FakeProbe {
    fn used_bytes(&self) -> io::Result<u64> {
        Ok(0)
    }

    fn available_bytes(&self) -> io::Result<u64> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

// ── Recording hook spy ─────────────────────────────────────────────

/// Records every recording-level notification.
#[derive(Debug, Default)]
pub struct HookSpy {
    completed: Mutex<Vec<(String, usize)>>,
    purged: Mutex<Vec<String>>,
}

impl HookSpy {
    pub fn completed(&self) -> Vec<(String, usize)> {
        self.completed.lock().unwrap().clone()
    }

    pub fn purged(&self) -> Vec<String> {
        self.purged.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordingHook for HookSpy {
    async fn on_recording_complete(&self, recording_id: &str, track_count: usize) {
        self.completed
            .lock()
            .unwrap()
            .push((recording_id.to_string(), track_count));
    }

    async fn on_recording_purged(&self, recording_id: &str) {
        self.purged.lock().unwrap().push(recording_id.to_string());
    }
}

// ── Harness ────────────────────────────────────────────────────────

/// A manager wired to fakes over an in-memory database.
pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub db: TestDb,
    pub store: Arc<dyn TaskStore>,
    pub transfer: Arc<ScriptedTransfer>,
    pub probe: Arc<FakeProbe>,
    pub hook: Arc<HookSpy>,
    pub events: BroadcastEmitter,
    pub manager: Arc<DownloadManagerImpl>,
}

impl Harness {
    pub fn downloads_dir(&self) -> PathBuf {
        self.tmp.path().join("downloads")
    }
}

pub fn test_config(downloads: &Path) -> QueueConfig {
    QueueConfig::new(downloads.to_path_buf())
        .with_low_space_threshold(0)
        .with_progress_checkpoint(Duration::from_millis(50))
}

pub async fn harness(transfer: ScriptedTransfer, configure: impl FnOnce(QueueConfig) -> QueueConfig) -> Harness {
    harness_with(transfer, Arc::new(AlwaysAllow), configure).await
}

pub async fn harness_with(
    transfer: ScriptedTransfer,
    network: Arc<dyn NetworkPolicy>,
    configure: impl FnOnce(QueueConfig) -> QueueConfig,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let db = TestDb::new().await.unwrap();
    let store: Arc<dyn TaskStore> = db.task_store();
    let transfer = Arc::new(transfer);
    let probe = Arc::new(FakeProbe::new(u64::MAX));
    let hook = Arc::new(HookSpy::default());
    let events = BroadcastEmitter::new(1024);

    let config = configure(test_config(&tmp.path().join("downloads")));
    let manager = build_download_manager(DownloadManagerDeps {
        store: Arc::clone(&store),
        transfer: Arc::clone(&transfer) as Arc<dyn TransferClient>,
        storage: Arc::clone(&probe) as Arc<dyn StorageProbe>,
        network,
        catalog: None,
        format_filter: Arc::new(PreferredFormatFilter),
        hook: Arc::clone(&hook) as Arc<dyn RecordingHook>,
        event_emitter: Arc::new(events.clone()),
        config,
    })
    .unwrap();

    Harness {
        tmp,
        db,
        store,
        transfer,
        probe,
        hook,
        events,
        manager: Arc::new(manager),
    }
}

/// A track with a known size matching what `ScriptedTransfer` writes.
pub fn track(name: &str) -> TrackFile {
    TrackFile::new(name, format!("https://archive.example/{name}"))
        .with_format("Flac")
        .with_size(DEFAULT_SIZE)
}

/// Poll a task until `pred` holds.
pub async fn wait_for_task(
    manager: &DownloadManagerImpl,
    id: &TaskId,
    what: &str,
    pred: impl Fn(&DownloadTask) -> bool,
) -> DownloadTask {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(task) = manager.get_task(id).await.unwrap() {
            if pred(&task) {
                return task;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll the whole store until `pred` holds.
pub async fn wait_for_tasks(
    manager: &DownloadManagerImpl,
    what: &str,
    pred: impl Fn(&[DownloadTask]) -> bool,
) -> Vec<DownloadTask> {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let tasks = manager.all_tasks().await.unwrap();
        if pred(&tasks) {
            return tasks;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll a synchronous condition (fake counters and the like).
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
