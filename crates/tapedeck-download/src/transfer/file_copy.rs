//! Local file transfer client.
//!
//! Copies `file://` URLs (or plain paths) in chunks, resuming from the
//! offset the manager passes and reporting progress after every chunk.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use tapedeck_core::{DownloadError, TransferClient, TransferRequest};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Transfer client for sources on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileTransfer {
    chunk_size: usize,
    chunk_delay: Option<Duration>,
}

impl Default for LocalFileTransfer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFileTransfer {
    pub const fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: None,
        }
    }

    /// Copy in chunks of `bytes` (minimum 1).
    #[must_use]
    pub const fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = if bytes == 0 { 1 } else { bytes };
        self
    }

    /// Sleep between chunks, capping throughput.
    #[must_use]
    pub const fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    fn source_path(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }
}

fn io_error(op: &str, e: &std::io::Error) -> DownloadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::not_found(e.to_string())
    } else {
        DownloadError::io(op, e.to_string())
    }
}

#[async_trait]
impl TransferClient for LocalFileTransfer {
    async fn transfer(&self, request: TransferRequest) -> Result<PathBuf, DownloadError> {
        let source = Self::source_path(&request.url);
        let total = tokio::fs::metadata(&source)
            .await
            .map_err(|e| io_error("stat", &e))?
            .len();

        let mut src = File::open(&source)
            .await
            .map_err(|e| io_error("open", &e))?;
        let mut dst = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&request.destination)
            .await
            .map_err(|e| io_error("create", &e))?;

        // Anything past the resume offset is discarded
        let resume_from = request.resume_from.min(total);
        dst.set_len(resume_from)
            .await
            .map_err(|e| io_error("truncate", &e))?;
        dst.seek(SeekFrom::Start(resume_from))
            .await
            .map_err(|e| io_error("seek", &e))?;
        src.seek(SeekFrom::Start(resume_from))
            .await
            .map_err(|e| io_error("seek", &e))?;

        request.report(resume_from, Some(total));

        let mut buf = vec![0u8; self.chunk_size];
        let mut written = resume_from;
        loop {
            if request.cancel.is_cancelled() {
                let _ = dst.flush().await;
                return Err(DownloadError::Cancelled);
            }

            let n = src
                .read(&mut buf)
                .await
                .map_err(|e| io_error("read", &e))?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])
                .await
                .map_err(|e| io_error("write", &e))?;
            written += n as u64;
            request.report(written, Some(total));

            if let Some(delay) = self.chunk_delay {
                tokio::select! {
                    () = request.cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        dst.flush().await.map_err(|e| io_error("flush", &e))?;

        tracing::debug!(
            target: "tapedeck.download",
            id = %request.task_id,
            bytes = written,
            "Local transfer finished"
        );

        Ok(request.destination)
    }
}
