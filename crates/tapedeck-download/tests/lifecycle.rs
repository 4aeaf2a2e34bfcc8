//! Integration tests for retries, soft deletion and recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tapedeck_core::ports::catalog::MockCatalogResolver;
use tapedeck_core::{
    AlwaysAllow, DeletionTarget, DownloadError, DownloadTask, NoopRecordingHook,
    PreferredFormatFilter, QueueConfig, RetryPolicy, StorageProbe, TaskStatus, TaskStore,
    ToggleNetworkPolicy, TrackFile, TransferClient,
};
use tapedeck_db::StoreFactory;
use tapedeck_download::{
    BroadcastEmitter, DownloadManagerDeps, LocalFileTransfer, VolumeStorageProbe,
    build_download_manager,
};

use common::{
    FakeProbe, HookSpy, ScriptedTransfer, harness, test_config, track, wait_for_task,
    wait_for_tasks, wait_until,
};

#[tokio::test]
async fn test_automatic_retry_stops_at_budget() {
    let h = harness(ScriptedTransfer::new(), |c| {
        c.with_retry(RetryPolicy::new(2))
            .with_auto_retry_on_failure(true)
    })
    .await;
    let file = track("flaky.flac");
    h.transfer.fail(&file.source_url, usize::MAX);
    let ids = h.manager.enqueue("rec", &[file]).await.unwrap();
    h.manager.start().await.unwrap();

    wait_until("three attempts", || h.transfer.attempts() == 3).await;
    let failed = wait_for_task(&h.manager, &ids[0], "final failure", |t| {
        t.status == TaskStatus::Failed && t.retry_count == 2
    })
    .await;
    assert!(failed.error_message.is_some());

    // No fourth automatic attempt
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.transfer.attempts(), 3);

    // A manual retry is always allowed and leaves the count alone
    h.manager.retry_failed_download(&ids[0]).await.unwrap();
    wait_until("manual attempt", || h.transfer.attempts() == 4).await;
    let after = wait_for_task(&h.manager, &ids[0], "manual failure", |t| {
        t.status == TaskStatus::Failed
    })
    .await;
    assert_eq!(after.retry_count, 2);
}

#[tokio::test]
async fn test_explicit_auto_retry_budget() {
    let h = harness(ScriptedTransfer::new(), |c| c).await;
    let file = track("flaky.flac");
    h.transfer.fail(&file.source_url, 2);
    let ids = h.manager.enqueue("rec", &[file]).await.unwrap();
    h.manager.start().await.unwrap();

    wait_for_task(&h.manager, &ids[0], "first failure", |t| {
        t.status == TaskStatus::Failed
    })
    .await;

    let requeued = h.manager.auto_retry_downloads(1).await.unwrap();
    assert_eq!(requeued, ids);
    let failed = wait_for_task(&h.manager, &ids[0], "second failure", |t| {
        t.status == TaskStatus::Failed && t.retry_count == 1
    })
    .await;
    assert_eq!(
        failed.error_message.as_deref(),
        Some(
            DownloadError::network_with_status("connection reset", 503)
                .task_message()
                .as_str()
        )
    );

    // Budget spent
    assert!(h.manager.auto_retry_downloads(1).await.unwrap().is_empty());

    // Third attempt succeeds once the source recovers
    let requeued = h.manager.retry_all_failed_downloads().await.unwrap();
    assert_eq!(requeued, ids);
    let done = wait_for_task(&h.manager, &ids[0], "completion", |t| {
        t.status == TaskStatus::Completed
    })
    .await;
    assert_eq!(done.retry_count, 1);
    assert!(done.error_message.is_none());
}

#[tokio::test]
async fn test_retry_rejects_live_tasks() {
    let h = harness(ScriptedTransfer::new(), |c| c).await;
    let ids = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();

    let err = h.manager.retry_failed_download(&ids[0]).await.unwrap_err();
    assert!(matches!(err, DownloadError::InvalidTransition { .. }));
    assert_eq!(
        h.manager.get_task(&ids[0]).await.unwrap().unwrap().status,
        TaskStatus::Queued
    );
}

#[tokio::test]
async fn test_soft_delete_is_reversible_until_grace_elapses() {
    let grace = Duration::from_secs(3600);
    let h = harness(ScriptedTransfer::new(), |c| c.with_grace_period(grace)).await;
    let ids = h
        .manager
        .enqueue("rec", &[track("t1.flac"), track("t2.flac")])
        .await
        .unwrap();
    h.manager.start().await.unwrap();
    let tasks = wait_for_tasks(&h.manager, "downloads", |tasks| {
        tasks.iter().all(|t| t.status == TaskStatus::Completed)
    })
    .await;
    let paths: Vec<_> = tasks.iter().filter_map(|t| t.local_path.clone()).collect();
    assert_eq!(paths.len(), 2);

    let target = DeletionTarget::Recording("rec".to_string());
    let marked = h.manager.mark_for_deletion(&target).await.unwrap();
    assert_eq!(marked.len(), 2);

    // Undo before anything is purged
    let restored = h.manager.restore(&target).await.unwrap();
    assert_eq!(restored.len(), 2);
    let report = h
        .manager
        .cleanup(
            Utc::now() + chrono::Duration::days(365),
            chrono::Duration::zero(),
        )
        .await
        .unwrap();
    assert!(report.removed.is_empty());
    assert!(paths.iter().all(|p| p.exists()));

    h.manager.mark_for_deletion(&target).await.unwrap();
    let marked_at = h
        .manager
        .get_task(&ids[0])
        .await
        .unwrap()
        .unwrap()
        .deletion_timestamp
        .unwrap();
    let grace = chrono::Duration::from_std(grace).unwrap();

    // Marked tasks are still visible until purged
    assert_eq!(h.manager.all_tasks().await.unwrap().len(), 2);

    let early = marked_at + grace - chrono::Duration::milliseconds(1);
    let report = h.manager.cleanup(early, grace).await.unwrap();
    assert!(report.removed.is_empty());
    assert!(paths.iter().all(|p| p.exists()));

    let report = h
        .manager
        .cleanup(marked_at + grace + chrono::Duration::milliseconds(1), grace)
        .await
        .unwrap();
    assert_eq!(report.removed.len(), 2);
    assert_eq!(report.bytes_freed, 2 * common::DEFAULT_SIZE);
    assert!(paths.iter().all(|p| !p.exists()));
    assert!(h.manager.all_tasks().await.unwrap().is_empty());
    assert_eq!(h.hook.purged(), vec!["rec".to_string()]);
}

#[tokio::test]
async fn test_purging_one_track_keeps_a_lookalike_track() {
    let h = harness(ScriptedTransfer::new(), |c| c.with_max_concurrent(2)).await;
    let ids = h
        .manager
        .enqueue("rec", &[track("a:b.flac"), track("a_b.flac")])
        .await
        .unwrap();
    h.manager.start().await.unwrap();
    let tasks = wait_for_tasks(&h.manager, "downloads", |tasks| {
        tasks.iter().all(|t| t.status == TaskStatus::Completed)
    })
    .await;

    let path_of = |id: &tapedeck_core::TaskId| {
        tasks
            .iter()
            .find(|t| &t.id == id)
            .and_then(|t| t.local_path.clone())
            .unwrap()
    };
    let (colon, plain) = (path_of(&ids[0]), path_of(&ids[1]));
    assert_ne!(colon, plain);
    assert_eq!(plain, h.downloads_dir().join("rec").join("a_b.flac"));

    h.manager
        .mark_for_deletion(&DeletionTarget::Task(ids[0].clone()))
        .await
        .unwrap();
    let report = h
        .manager
        .cleanup(
            Utc::now() + chrono::Duration::days(365),
            chrono::Duration::zero(),
        )
        .await
        .unwrap();
    assert_eq!(report.removed, vec![ids[0].clone()]);

    let survivor = h.manager.get_task(&ids[1]).await.unwrap().unwrap();
    assert_eq!(survivor.status, TaskStatus::Completed);
    assert!(!colon.exists());
    assert_eq!(std::fs::metadata(&plain).unwrap().len(), common::DEFAULT_SIZE);
}

#[tokio::test]
async fn test_reenqueue_clears_deletion_mark() {
    let h = harness(ScriptedTransfer::new(), |c| c).await;
    let ids = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    h.manager
        .mark_for_deletion(&DeletionTarget::Task(ids[0].clone()))
        .await
        .unwrap();

    h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    let task = h.manager.get_task(&ids[0]).await.unwrap().unwrap();
    assert!(!task.is_marked_for_deletion);
    assert!(task.deletion_timestamp.is_none());
}

#[tokio::test]
async fn test_marked_tasks_are_not_admitted() {
    let h = harness(ScriptedTransfer::new(), |c| c).await;
    let ids = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    h.manager
        .mark_for_deletion(&DeletionTarget::Task(ids[0].clone()))
        .await
        .unwrap();
    h.manager.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.transfer.attempts(), 0);

    h.manager
        .restore(&DeletionTarget::Task(ids[0].clone()))
        .await
        .unwrap();
    wait_for_task(&h.manager, &ids[0], "completion", |t| {
        t.status == TaskStatus::Completed
    })
    .await;
}

#[tokio::test]
async fn test_interrupted_downloads_are_requeued_on_start() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("tapedeck.db");
    let downloads = tmp.path().join("downloads");

    let file = track("t1.flac");
    let mut interrupted = DownloadTask::queued("rec", &file, 0, 1, Utc::now());
    interrupted.status = TaskStatus::Downloading;
    interrupted.bytes_downloaded = 32;
    interrupted.started_at = Some(Utc::now());

    {
        let pool = StoreFactory::create_pool(&db_path).await.unwrap();
        let store = StoreFactory::task_store(pool.clone());
        store.upsert(&interrupted).await.unwrap();
        pool.close().await;
    }

    let pool = StoreFactory::create_pool(&db_path).await.unwrap();
    let store = StoreFactory::task_store_port(pool.clone());
    let transfer = Arc::new(ScriptedTransfer::new());
    let manager = Arc::new(
        build_download_manager(DownloadManagerDeps {
            store: Arc::clone(&store),
            transfer: Arc::clone(&transfer) as Arc<dyn TransferClient>,
            storage: Arc::new(FakeProbe::new(u64::MAX)),
            network: Arc::new(ToggleNetworkPolicy::new(false)),
            catalog: None,
            format_filter: Arc::new(PreferredFormatFilter),
            hook: Arc::new(NoopRecordingHook),
            event_emitter: Arc::new(BroadcastEmitter::with_defaults()),
            config: test_config(&downloads),
        })
        .unwrap(),
    );

    let reset = manager.start().await.unwrap();
    assert_eq!(reset, vec![interrupted.id.clone()]);

    let task = manager.get_task(&interrupted.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.bytes_downloaded, 32);
    manager.shutdown().await;
    assert_eq!(transfer.attempts(), 0);
    pool.close().await;

    // The reset survives a reopen
    let pool = StoreFactory::create_pool(&db_path).await.unwrap();
    let store = StoreFactory::task_store(pool);
    let task = store.get(&interrupted.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_enqueue_recording_resolves_and_filters() {
    let tmp = tempfile::tempdir().unwrap();
    let db = tapedeck_db::TestDb::new().await.unwrap();

    let mut catalog = MockCatalogResolver::new();
    catalog
        .expect_resolve()
        .withf(|id| id == "gd1977-05-08")
        .times(1)
        .returning(|_| {
            Ok(vec![
                TrackFile::new("d1t01.flac", "https://archive.example/d1t01.flac")
                    .with_format("Flac")
                    .with_size(64),
                TrackFile::new("d1t01.mp3", "https://archive.example/d1t01.mp3")
                    .with_format("VBR MP3")
                    .with_size(64),
                TrackFile::new("info.txt", "https://archive.example/info.txt"),
            ])
        });
    catalog
        .expect_resolve()
        .withf(|id| id == "empty")
        .returning(|_| Ok(Vec::new()));

    let manager = build_download_manager(DownloadManagerDeps {
        store: db.task_store(),
        transfer: Arc::new(ScriptedTransfer::new()),
        storage: Arc::new(FakeProbe::new(u64::MAX)),
        network: Arc::new(AlwaysAllow),
        catalog: Some(Arc::new(catalog)),
        format_filter: Arc::new(PreferredFormatFilter),
        hook: Arc::new(HookSpy::default()),
        event_emitter: Arc::new(BroadcastEmitter::with_defaults()),
        config: test_config(tmp.path()),
    })
    .unwrap();

    let ids = manager
        .enqueue_recording("gd1977-05-08", &["flac".to_string()])
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    let task = manager.get_task(&ids[0]).await.unwrap().unwrap();
    assert_eq!(task.track_filename, "d1t01.flac");
    assert_eq!(task.format.as_deref(), Some("Flac"));

    let err = manager.enqueue_recording("empty", &[]).await.unwrap_err();
    assert!(matches!(err, DownloadError::ResolutionFailed { .. }));
}

#[tokio::test]
async fn test_enqueue_recording_without_catalog_fails() {
    let h = harness(ScriptedTransfer::new(), |c| c).await;
    let err = h.manager.enqueue_recording("rec", &[]).await.unwrap_err();
    assert!(matches!(err, DownloadError::ResolutionFailed { .. }));
}

#[tokio::test]
async fn test_local_files_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let source_dir = tmp.path().join("source");
    let downloads = tmp.path().join("downloads");
    std::fs::create_dir_all(&source_dir).unwrap();
    std::fs::create_dir_all(&downloads).unwrap();

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let source = source_dir.join("d1t01.flac");
    std::fs::write(&source, &payload).unwrap();

    let db = tapedeck_db::TestDb::new().await.unwrap();
    let store: Arc<dyn TaskStore> = db.task_store();
    let hook = Arc::new(HookSpy::default());
    let probe: Arc<dyn StorageProbe> = Arc::new(VolumeStorageProbe::new(downloads.clone()));
    let config = QueueConfig::new(downloads.clone())
        .with_low_space_threshold(0)
        .with_progress_checkpoint(Duration::from_millis(10));

    let manager = Arc::new(
        build_download_manager(DownloadManagerDeps {
            store,
            transfer: Arc::new(
                LocalFileTransfer::new()
                    .with_chunk_size(1024)
                    .with_chunk_delay(Duration::from_millis(2)),
            ),
            storage: probe,
            network: Arc::new(AlwaysAllow),
            catalog: None,
            format_filter: Arc::new(PreferredFormatFilter),
            hook: Arc::clone(&hook) as Arc<dyn tapedeck_core::RecordingHook>,
            event_emitter: Arc::new(BroadcastEmitter::with_defaults()),
            config,
        })
        .unwrap(),
    );

    let file = TrackFile::new("d1t01.flac", format!("file://{}", source.display()))
        .with_format("Flac")
        .with_size(payload.len() as u64);
    let ids = manager.enqueue("local-rec", &[file]).await.unwrap();
    manager.start().await.unwrap();

    let done = wait_for_task(&manager, &ids[0], "local copy", |t| {
        t.status == TaskStatus::Completed
    })
    .await;
    let copied = std::fs::read(done.local_path.unwrap()).unwrap();
    assert_eq!(copied, payload);
    wait_until("completion hook", || !hook.completed().is_empty()).await;
    assert_eq!(hook.completed(), vec![("local-rec".to_string(), 1)]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_missing_local_source_fails_task() {
    let tmp = tempfile::tempdir().unwrap();
    let db = tapedeck_db::TestDb::new().await.unwrap();
    let manager = Arc::new(
        build_download_manager(DownloadManagerDeps {
            store: db.task_store(),
            transfer: Arc::new(LocalFileTransfer::new()),
            storage: Arc::new(FakeProbe::new(u64::MAX)),
            network: Arc::new(AlwaysAllow),
            catalog: None,
            format_filter: Arc::new(PreferredFormatFilter),
            hook: Arc::new(NoopRecordingHook),
            event_emitter: Arc::new(BroadcastEmitter::with_defaults()),
            config: test_config(&tmp.path().join("downloads")),
        })
        .unwrap(),
    );

    let missing = tmp.path().join("nope.flac");
    let file = TrackFile::new("nope.flac", missing.display().to_string());
    let ids = manager.enqueue("rec", &[file]).await.unwrap();
    manager.start().await.unwrap();

    let failed = wait_for_task(&manager, &ids[0], "failure", |t| {
        t.status == TaskStatus::Failed
    })
    .await;
    assert!(failed.error_message.is_some());
    assert_eq!(failed.retry_count, 0);
}
