//! Transfer client port.
//!
//! The transfer client moves bytes from a source URL to a local file. The
//! download manager owns scheduling, retries and bookkeeping; the client
//! only reports progress and a terminal result.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::download::{DownloadError, TaskId};

/// Progress update sent through the watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes on disk so far, including any resumed prefix.
    pub downloaded: u64,
    /// Total size once the client knows it.
    pub total: Option<u64>,
    /// Monotonically increasing sequence number for change detection.
    pub seq: u64,
}

impl TransferProgress {
    /// Create a new progress update with a sequence number.
    pub const fn new(downloaded: u64, total: Option<u64>, seq: u64) -> Self {
        Self {
            downloaded,
            total,
            seq,
        }
    }
}

/// Everything a client needs to run one transfer.
#[derive(Debug)]
pub struct TransferRequest {
    pub task_id: TaskId,
    pub url: String,
    /// Final file path; the parent directory exists.
    pub destination: PathBuf,
    /// Bytes already present from an earlier attempt.
    pub resume_from: u64,
    pub cancel: CancellationToken,
    pub progress_tx: watch::Sender<TransferProgress>,
}

impl TransferRequest {
    /// Publish a progress update, bumping the sequence number.
    pub fn report(&self, downloaded: u64, total: Option<u64>) {
        // send_modify is infallible even with no receivers
        self.progress_tx.send_modify(|state| {
            state.downloaded = downloaded;
            state.total = total;
            state.seq += 1;
        });
    }
}

/// Port for the byte transfer mechanism.
///
/// Implementations must observe `request.cancel` and return
/// `Err(DownloadError::Cancelled)` promptly once it fires.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Run the transfer to completion. Returns the path of the written file.
    async fn transfer(&self, request: TransferRequest) -> Result<PathBuf, DownloadError>;
}
