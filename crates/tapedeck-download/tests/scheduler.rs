//! Integration tests for admission and the transfer lifecycle.
//!
//! Each test drives a real manager over an in-memory database with a
//! scripted transfer client.
//!
//! # What is tested
//!
//! - Enqueue is idempotent and never resets a running transfer
//! - The number of running transfers never exceeds `max_concurrent`
//! - Admission follows priority, then enqueue order
//! - A task that does not fit is skipped without blocking smaller ones
//! - A size that turns out too large mid-flight fails the task
//! - Recording completion fires exactly once per episode
//! - Pause, resume, cancel and network gating
//! - Clearing the queue takes partial files with it

mod common;

use std::sync::Arc;
use std::time::Duration;

use tapedeck_core::{
    DownloadEvent, NetworkPolicy, QueueConfig, TaskId, TaskStatus, ToggleNetworkPolicy,
};

use tapedeck_download::DownloadDestination;

use common::{
    DEFAULT_SIZE, ScriptedTransfer, harness, harness_with, track, wait_for_task, wait_for_tasks,
    wait_until,
};

fn keep(config: QueueConfig) -> QueueConfig {
    config
}

#[tokio::test]
async fn test_enqueue_is_idempotent() {
    let h = harness(ScriptedTransfer::gated(), keep).await;

    let first = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    let second = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.manager.all_tasks().await.unwrap().len(), 1);

    h.manager.start().await.unwrap();
    let id = &first[0];
    wait_for_task(&h.manager, id, "download to start", |t| {
        t.status == TaskStatus::Downloading
    })
    .await;
    wait_until("transfer to start", || h.transfer.running() == 1).await;

    // Re-enqueue while running leaves the transfer alone
    let before = h.manager.get_task(id).await.unwrap().unwrap();
    h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    let after = h.manager.get_task(id).await.unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Downloading);
    assert_eq!(after.enqueue_seq, before.enqueue_seq);
    assert_eq!(after.started_at, before.started_at);
    assert_eq!(h.transfer.attempts(), 1);

    h.transfer.release(1);
    wait_for_task(&h.manager, id, "completion", |t| t.status == TaskStatus::Completed).await;
    assert_eq!(h.manager.all_tasks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_enqueue_after_cancel_starts_fresh() {
    let h = harness(ScriptedTransfer::new(), keep).await;
    let ids = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    let original = h.manager.get_task(&ids[0]).await.unwrap().unwrap();

    h.manager.cancel(&ids[0]).await.unwrap();
    h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();

    let fresh = h.manager.get_task(&ids[0]).await.unwrap().unwrap();
    assert_eq!(fresh.status, TaskStatus::Queued);
    assert_eq!(fresh.retry_count, 0);
    assert!(fresh.enqueue_seq > original.enqueue_seq);
}

#[tokio::test]
async fn test_concurrency_bound() {
    let h = harness(ScriptedTransfer::gated(), |c| c.with_max_concurrent(2)).await;
    let files: Vec<_> = (1..=5).map(|i| track(&format!("t{i}.flac"))).collect();
    h.manager.enqueue("rec", &files).await.unwrap();
    h.manager.start().await.unwrap();

    wait_until("two transfers running", || h.transfer.running() == 2).await;
    // Give the runner a chance to overshoot
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.transfer.running(), 2);
    assert_eq!(h.manager.active_downloads().await.unwrap().len(), 2);

    h.transfer.release(5);
    wait_for_tasks(&h.manager, "all downloads", |tasks| {
        tasks.iter().all(|t| t.status == TaskStatus::Completed)
    })
    .await;
    assert_eq!(h.transfer.max_running(), 2);
    assert_eq!(h.transfer.attempts(), 5);
}

#[tokio::test]
async fn test_priority_then_enqueue_order() {
    let h = harness(ScriptedTransfer::new(), |c| c.with_max_concurrent(1)).await;

    let a = h
        .manager
        .enqueue_with_priority("rec", &[track("a.flac")], 5)
        .await
        .unwrap();
    let b = h
        .manager
        .enqueue_with_priority("rec", &[track("b.flac")], 10)
        .await
        .unwrap();
    let c = h
        .manager
        .enqueue_with_priority("rec", &[track("c.flac")], 5)
        .await
        .unwrap();

    let snapshot = h.manager.queue_snapshot().await.unwrap();
    let queued: Vec<_> = snapshot.queued.iter().map(|t| t.id.clone()).collect();
    assert_eq!(queued, vec![b[0].clone(), a[0].clone(), c[0].clone()]);

    h.manager.start().await.unwrap();
    wait_for_tasks(&h.manager, "all downloads", |tasks| {
        tasks.iter().all(|t| t.status == TaskStatus::Completed)
    })
    .await;

    assert_eq!(
        h.transfer.started(),
        vec![b[0].clone(), a[0].clone(), c[0].clone()]
    );
}

#[tokio::test]
async fn test_reorder_queue_changes_admission_order() {
    let h = harness(ScriptedTransfer::new(), |c| c.with_max_concurrent(1)).await;
    let ids = h
        .manager
        .enqueue("rec", &[track("a.flac"), track("b.flac"), track("c.flac")])
        .await
        .unwrap();

    let wanted = vec![ids[2].clone(), ids[0].clone(), ids[1].clone()];
    h.manager.reorder_queue(&wanted).await.unwrap();

    let priorities: Vec<_> = h
        .manager
        .queue_snapshot()
        .await
        .unwrap()
        .queued
        .iter()
        .map(|t| (t.id.clone(), t.priority))
        .collect();
    assert_eq!(
        priorities,
        vec![
            (ids[2].clone(), 3),
            (ids[0].clone(), 2),
            (ids[1].clone(), 1)
        ]
    );

    h.manager.start().await.unwrap();
    wait_for_tasks(&h.manager, "all downloads", |tasks| {
        tasks.iter().all(|t| t.status == TaskStatus::Completed)
    })
    .await;
    assert_eq!(h.transfer.started(), wanted);
}

#[tokio::test]
async fn test_storage_rejection_does_not_block_smaller_tasks() {
    let h = harness(ScriptedTransfer::new(), keep).await;
    h.probe.set_available(1_000);

    let big_file = tapedeck_core::TrackFile::new("big.flac", "https://archive.example/big.flac")
        .with_size(5_000);
    h.transfer.announce("https://archive.example/big.flac", 5_000);
    let big = h
        .manager
        .enqueue_with_priority("rec", &[big_file], 10)
        .await
        .unwrap();
    let small = h.manager.enqueue("rec", &[track("small.flac")]).await.unwrap();

    h.manager.start().await.unwrap();
    wait_for_task(&h.manager, &small[0], "small download", |t| {
        t.status == TaskStatus::Completed
    })
    .await;

    let big_task = h.manager.get_task(&big[0]).await.unwrap().unwrap();
    assert_eq!(big_task.status, TaskStatus::Queued);
    assert!(big_task.error_message.is_none());

    // Space frees up; the next pass admits it
    h.probe.set_available(1_000_000);
    h.manager.notify();
    wait_for_task(&h.manager, &big[0], "big download", |t| {
        t.status == TaskStatus::Completed
    })
    .await;
}

#[tokio::test]
async fn test_unknown_size_that_does_not_fit_fails_mid_flight() {
    let h = harness(ScriptedTransfer::gated(), keep).await;
    h.probe.set_available(1_000);

    let file = tapedeck_core::TrackFile::new("huge.flac", "https://archive.example/huge.flac");
    h.transfer.announce("https://archive.example/huge.flac", 50_000);
    let ids = h.manager.enqueue("rec", &[file]).await.unwrap();
    h.manager.start().await.unwrap();

    let failed = wait_for_task(&h.manager, &ids[0], "storage failure", |t| {
        t.status == TaskStatus::Failed
    })
    .await;
    assert_eq!(failed.error_message.as_deref(), Some("insufficient storage"));
    assert_eq!(h.transfer.running(), 0);
}

#[tokio::test]
async fn test_storage_low_event_on_crossing() {
    let h = harness(ScriptedTransfer::new(), |c| c.with_low_space_threshold(10_000)).await;
    let mut events = h.events.subscribe();
    h.probe.set_available(5_000);

    h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    h.manager.start().await.unwrap();
    wait_for_tasks(&h.manager, "download", |tasks| {
        tasks.iter().all(|t| t.status == TaskStatus::Completed)
    })
    .await;

    let mut storage_low = 0;
    while let Ok(event) = events.try_recv() {
        if let DownloadEvent::StorageLow {
            available,
            threshold,
        } = event
        {
            assert_eq!((available, threshold), (5_000, 10_000));
            storage_low += 1;
        }
    }
    // Several passes ran below the threshold; only the crossing is reported
    assert_eq!(storage_low, 1);
}

#[tokio::test]
async fn test_recording_completion_fires_once() {
    let h = harness(ScriptedTransfer::new(), |c| c.with_max_concurrent(3)).await;
    let mut events = h.events.subscribe();
    let files = [track("d1t01.flac"), track("d1t02.flac"), track("d1t03.flac")];
    let ids = h.manager.enqueue("gd1977-05-08", &files).await.unwrap();

    h.manager.start().await.unwrap();
    wait_for_tasks(&h.manager, "recording", |tasks| {
        tasks.iter().all(|t| t.status == TaskStatus::Completed)
    })
    .await;
    wait_until("completion hook", || !h.hook.completed().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.hook.completed(), vec![("gd1977-05-08".to_string(), 3)]);
    let status = h.manager.recording_status("gd1977-05-08").await.unwrap();
    assert!(status.is_complete());
    assert_eq!(status.bytes_downloaded, 3 * DEFAULT_SIZE);

    let mut announced = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DownloadEvent::RecordingCompleted { .. }) {
            announced += 1;
        }
    }
    assert_eq!(announced, 1);

    // Deleting and re-fetching one track starts a new episode
    assert!(h.manager.delete(&ids[1]).await.unwrap());
    h.manager.enqueue("gd1977-05-08", &files[1..2]).await.unwrap();
    wait_until("second completion", || h.hook.completed().len() == 2).await;
}

#[tokio::test]
async fn test_completed_task_records_file_and_progress() {
    let h = harness(ScriptedTransfer::new(), keep).await;
    let ids = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    h.manager.start().await.unwrap();

    let done = wait_for_task(&h.manager, &ids[0], "completion", |t| {
        t.status == TaskStatus::Completed
    })
    .await;
    let path = done.local_path.clone().unwrap();
    assert_eq!(path, h.downloads_dir().join("rec").join("t1.flac"));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), DEFAULT_SIZE);
    assert_eq!(done.bytes_downloaded, DEFAULT_SIZE);
    assert_eq!(done.progress_fraction, Some(1.0));
    assert!(done.completed_at.is_some());

    let stats = h.manager.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total_bytes_downloaded, DEFAULT_SIZE);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let h = harness(ScriptedTransfer::gated(), keep).await;
    let mut events = h.events.subscribe();
    let ids = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    let id = &ids[0];
    h.manager.start().await.unwrap();

    wait_for_task(&h.manager, id, "start", |t| t.status == TaskStatus::Downloading).await;
    wait_until("transfer to start", || h.transfer.running() == 1).await;
    h.manager.pause(id).await.unwrap();
    assert_eq!(
        h.manager.get_task(id).await.unwrap().unwrap().status,
        TaskStatus::Paused
    );
    wait_until("transfer to stop", || h.transfer.running() == 0).await;

    // Pausing again is a no-op; the stale finalize must not touch the record
    h.manager.pause(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.manager.get_task(id).await.unwrap().unwrap().status,
        TaskStatus::Paused
    );

    h.manager.resume(id).await.unwrap();
    wait_until("second attempt", || h.transfer.attempts() == 2).await;
    h.transfer.release(1);
    wait_for_task(&h.manager, id, "completion", |t| t.status == TaskStatus::Completed).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.task_id() == Some(id.as_str()) {
            seen.push(event);
        }
    }
    assert!(seen.iter().any(|e| matches!(e, DownloadEvent::TaskPaused { .. })));
    assert!(seen.iter().any(|e| matches!(e, DownloadEvent::TaskResumed { .. })));
    assert!(!seen.iter().any(|e| matches!(e, DownloadEvent::TaskCancelled { .. })));
}

#[tokio::test]
async fn test_cancel_frees_slot_immediately() {
    let h = harness(ScriptedTransfer::gated(), |c| c.with_max_concurrent(1)).await;
    let ids = h
        .manager
        .enqueue("rec", &[track("t1.flac"), track("t2.flac")])
        .await
        .unwrap();
    h.manager.start().await.unwrap();

    wait_for_task(&h.manager, &ids[0], "first start", |t| {
        t.status == TaskStatus::Downloading
    })
    .await;
    h.manager.cancel(&ids[0]).await.unwrap();

    wait_for_task(&h.manager, &ids[1], "second start", |t| {
        t.status == TaskStatus::Downloading
    })
    .await;
    assert_eq!(
        h.manager.get_task(&ids[0]).await.unwrap().unwrap().status,
        TaskStatus::Cancelled
    );

    // Cancelled tasks cannot be resumed, only retried
    let err = h.manager.resume(&ids[0]).await.unwrap_err();
    assert!(matches!(
        err,
        tapedeck_core::DownloadError::InvalidTransition { .. }
    ));

    h.transfer.release(1);
    wait_for_task(&h.manager, &ids[1], "second completion", |t| {
        t.status == TaskStatus::Completed
    })
    .await;
}

#[tokio::test]
async fn test_cancel_recording_and_clear_queue() {
    let h = harness(ScriptedTransfer::new(), keep).await;
    let first = h
        .manager
        .enqueue("rec-a", &[track("t1.flac"), track("t2.flac")])
        .await
        .unwrap();
    let second = h
        .manager
        .enqueue("rec-b", &[track("t1.flac")])
        .await
        .unwrap();

    let cancelled = h.manager.cancel_recording("rec-a").await.unwrap();
    assert_eq!(cancelled, first);

    assert_eq!(h.manager.clear_queue().await.unwrap(), 1);
    assert!(h.manager.get_task(&second[0]).await.unwrap().is_none());
    assert_eq!(h.manager.all_tasks().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_clear_queue_removes_partial_files() {
    let network = Arc::new(ToggleNetworkPolicy::new(false));
    let h = harness_with(ScriptedTransfer::new(), network, keep).await;
    h.manager.start().await.unwrap();
    let ids = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();

    // Bytes kept from an interrupted or paused attempt
    let partial = DownloadDestination::plan(&h.downloads_dir(), "rec", "t1.flac");
    partial.ensure_dir().unwrap();
    std::fs::write(partial.file_path(), vec![0xAB; 32]).unwrap();

    assert_eq!(h.manager.clear_queue().await.unwrap(), 1);
    assert!(h.manager.get_task(&ids[0]).await.unwrap().is_none());
    assert!(!partial.file_path().exists());
    assert_eq!(h.transfer.attempts(), 0);
}

#[tokio::test]
async fn test_network_policy_gates_admission() {
    let policy = Arc::new(ToggleNetworkPolicy::new(false));
    let h = harness_with(
        ScriptedTransfer::new(),
        Arc::clone(&policy) as Arc<dyn NetworkPolicy>,
        keep,
    )
    .await;
    let ids = h.manager.enqueue("rec", &[track("t1.flac")]).await.unwrap();
    h.manager.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.transfer.attempts(), 0);
    assert_eq!(
        h.manager.get_task(&ids[0]).await.unwrap().unwrap().status,
        TaskStatus::Queued
    );

    policy.set_allowed(true);
    h.manager.notify();
    wait_for_task(&h.manager, &ids[0], "completion", |t| t.status == TaskStatus::Completed).await;
}

#[tokio::test]
async fn test_unknown_task_operations_fail() {
    let h = harness(ScriptedTransfer::new(), keep).await;
    let ghost = TaskId::from_raw("does-not-exist");

    assert!(matches!(
        h.manager.pause(&ghost).await,
        Err(tapedeck_core::DownloadError::TaskNotFound { .. })
    ));
    assert!(matches!(
        h.manager.retry_failed_download(&ghost).await,
        Err(tapedeck_core::DownloadError::TaskNotFound { .. })
    ));
    assert!(!h.manager.delete(&ghost).await.unwrap());
}
