//! One transfer attempt, start to verified file.
//!
//! The worker sees a plain `DownloadJob` and the transfer port. It never
//! touches the store, the lease map or the event sink: progress leaves
//! through the job's `watch::Sender` and the outcome through the return
//! value, and the manager does all bookkeeping.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use tapedeck_core::{DownloadError, TaskId, TransferClient, TransferProgress, TransferRequest};

use super::paths::DownloadDestination;

/// Ports a worker may call.
#[derive(Clone)]
pub struct WorkerDeps {
    /// Transfer client that moves the bytes.
    pub transfer: Arc<dyn TransferClient>,
}

/// Snapshot of an admitted task, detached from the manager.
pub struct DownloadJob {
    /// The task being transferred.
    pub id: TaskId,
    /// Source URL.
    pub url: String,
    /// Planned destination (recording directory + file).
    pub destination: DownloadDestination,
    /// Size the catalog announced, if any.
    pub expected_size: Option<u64>,
    /// Fired by pause, cancel, a mid-flight storage abort or shutdown.
    pub cancel: CancellationToken,
    /// Read by the manager's progress bridge.
    pub progress_tx: watch::Sender<TransferProgress>,
}

/// Result of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    /// The task that finished.
    pub id: TaskId,
    /// Where the file was written.
    pub path: PathBuf,
    /// Size of the file on disk.
    pub bytes: u64,
    /// Bytes that were already on disk when this attempt began.
    pub resumed_from: u64,
}

/// Create the recording directory, resume from any partial file, run the
/// transfer and check the written size against the announced total.
///
/// Returns `Err(DownloadError::Cancelled)` as soon as `job.cancel` fires.
pub async fn run_job(job: DownloadJob, deps: &WorkerDeps) -> Result<CompletedJob, DownloadError> {
    job.destination.ensure_dir()?;

    let resume_from = job.destination.existing_len();
    let expected = job.expected_size;

    // A previous attempt may have written past the announced size
    if expected.is_some_and(|size| resume_from > size) {
        tracing::warn!(
            target: "tapedeck.download",
            id = %job.id,
            resume_from,
            "Existing file is larger than expected; starting over"
        );
        std::fs::remove_file(job.destination.file_path())
            .map_err(|e| DownloadError::io("remove_file", e.to_string()))?;
    }
    let resume_from = job.destination.existing_len();

    let request = TransferRequest {
        task_id: job.id.clone(),
        url: job.url.clone(),
        destination: job.destination.file_path(),
        resume_from,
        cancel: job.cancel.clone(),
        progress_tx: job.progress_tx.clone(),
    };

    // Cancellation wins even if the transfer ignores its token
    let path = tokio::select! {
        biased;

        () = job.cancel.cancelled() => {
            return Err(DownloadError::Cancelled);
        }

        result = deps.transfer.transfer(request) => result?,
    };

    let bytes = tokio::fs::metadata(&path)
        .await
        .map_err(|e| DownloadError::io("stat", e.to_string()))?
        .len();

    // The announced total wins over the catalog's guess
    let total = job.progress_tx.borrow().total.or(expected);
    if let Some(total) = total {
        if bytes != total {
            return Err(DownloadError::io(
                "size_mismatch",
                format!("expected {total} bytes, wrote {bytes}"),
            ));
        }
    }

    Ok(CompletedJob {
        id: job.id,
        path,
        bytes,
        resumed_from: resume_from,
    })
}
