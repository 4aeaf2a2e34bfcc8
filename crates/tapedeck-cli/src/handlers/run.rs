//! The `run` command: drive the queue and report events.

use std::time::Duration;

use tapedeck_core::DownloadEvent;
use tokio::sync::broadcast::error::RecvError;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::format_bytes;

const IDLE_POLL: Duration = Duration::from_millis(500);

/// Start the manager and keep it running.
///
/// Stops on Ctrl-C, or once nothing is queued or downloading when
/// `until_idle` is set. Transfers still running at shutdown are picked up
/// again by the next `run`.
pub async fn execute(ctx: &CliContext, until_idle: bool) -> Result<(), CliError> {
    let mut events = ctx.events().subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => report(&event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "Event reporter fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let recovered = ctx.manager().start().await?;
    if !recovered.is_empty() {
        println!("Requeued {} interrupted download(s).", recovered.len());
    }

    let outcome = drive(ctx, until_idle).await;

    ctx.manager().shutdown().await;
    reporter.abort();
    outcome
}

async fn drive(ctx: &CliContext, until_idle: bool) -> Result<(), CliError> {
    let mut poll = tokio::time::interval(IDLE_POLL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                println!("Stopping...");
                return Ok(());
            }
            _ = poll.tick(), if until_idle => {
                let snapshot = ctx.manager().queue_snapshot().await?;
                // Soft-deleted queued tasks are never admitted
                let waiting = snapshot.queued.iter().filter(|t| t.is_admissible()).count();
                if waiting == 0 && snapshot.active.is_empty() {
                    let stats = ctx.manager().stats().await?;
                    println!(
                        "Queue idle: {} completed, {} failed.",
                        stats.completed, stats.failed
                    );
                    return Ok(());
                }
            }
        }
    }
}

fn report(event: &DownloadEvent) {
    match event {
        DownloadEvent::TaskStarted { id } => println!("started    {id}"),
        DownloadEvent::TaskCompleted { id, local_path } => {
            println!("completed  {id} -> {local_path}");
        }
        DownloadEvent::TaskFailed { id, error } => println!("failed     {id}: {error}"),
        DownloadEvent::TaskRequeued { id, retry_count } => {
            println!("retrying   {id} (attempt {})", retry_count + 1);
        }
        DownloadEvent::RecordingCompleted {
            recording_id,
            track_count,
        } => println!("recording  {recording_id} complete ({track_count} tracks)"),
        DownloadEvent::StorageLow {
            available,
            threshold,
        } => println!(
            "warning    low disk space: {} free (threshold {})",
            format_bytes(*available),
            format_bytes(*threshold)
        ),
        other => tracing::debug!(event = ?other, "Download event"),
    }
}
