//! Storage admission control.
//!
//! Answers "is there room for N more bytes?" against the volume holding the
//! downloads directory. Every probe call reads live figures; nothing is
//! cached between calls. The scheduler reads free space once per admission
//! pass through [`StorageAdmission::read_available`], which runs the probe on
//! the blocking pool, and judges every candidate against that figure.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use sysinfo::Disks;
use tapedeck_core::{DownloadError, DownloadResult, StorageProbe};
use walkdir::WalkDir;

/// Gatekeeper in front of the transfer pool.
#[derive(Clone)]
pub struct StorageAdmission {
    probe: Arc<dyn StorageProbe>,
}

impl StorageAdmission {
    pub fn new(probe: Arc<dyn StorageProbe>) -> Self {
        Self { probe }
    }

    /// Bytes used by downloaded content.
    pub fn used_bytes(&self) -> DownloadResult<u64> {
        self.probe
            .used_bytes()
            .map_err(|e| DownloadError::from_io_error(&e))
    }

    /// Bytes free on the downloads volume.
    pub fn available_bytes(&self) -> DownloadResult<u64> {
        self.probe
            .available_bytes()
            .map_err(|e| DownloadError::from_io_error(&e))
    }

    /// Check that `required` more bytes fit.
    pub fn check(&self, required: u64) -> DownloadResult<()> {
        Self::fits(self.probe_available(), required)
    }

    /// Free space read on the blocking pool, or `None` if the probe failed.
    ///
    /// Scanning mount tables can stall, so async callers go through this
    /// instead of [`check`](Self::check).
    pub async fn read_available(&self) -> Option<u64> {
        let probe = Arc::clone(&self.probe);
        match tokio::task::spawn_blocking(move || probe.available_bytes()).await {
            Ok(Ok(available)) => Some(available),
            Ok(Err(e)) => {
                tracing::warn!(target: "tapedeck.download", error = %e, "Free space probe failed");
                None
            }
            Err(e) => {
                tracing::warn!(target: "tapedeck.download", error = %e, "Free space probe panicked");
                None
            }
        }
    }

    /// Judge `required` against a free-space figure read earlier.
    ///
    /// An unknown figure admits optimistically: a full disk surfaces later
    /// as a transfer error, while a broken probe must not stall the queue.
    pub fn fits(available: Option<u64>, required: u64) -> DownloadResult<()> {
        match available {
            Some(available) if available < required => Err(DownloadError::InsufficientStorage {
                required,
                available,
            }),
            _ => Ok(()),
        }
    }

    fn probe_available(&self) -> Option<u64> {
        self.probe
            .available_bytes()
            .inspect_err(|e| {
                tracing::warn!(target: "tapedeck.download", error = %e, "Free space probe failed");
            })
            .ok()
    }

    /// Whether `required` more bytes fit.
    pub fn validate(&self, required: u64) -> bool {
        self.check(required).is_ok()
    }

    /// Whether free space is below `threshold` (false when unknown).
    pub fn is_below_threshold(&self, threshold: u64) -> bool {
        self.probe_available()
            .is_some_and(|available| available < threshold)
    }
}

/// Probe backed by the real filesystem.
///
/// `available_bytes` reads the mounted volume whose mount point is the
/// longest prefix of the downloads directory. `used_bytes` sums file sizes
/// under the downloads directory.
#[derive(Debug, Clone)]
pub struct VolumeStorageProbe {
    downloads_dir: PathBuf,
}

impl VolumeStorageProbe {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
        }
    }

    /// The nearest existing ancestor, canonicalized, so a not-yet-created
    /// downloads directory still resolves to its volume.
    fn resolved_dir(&self) -> io::Result<PathBuf> {
        let mut candidate = self.downloads_dir.as_path();
        loop {
            match candidate.canonicalize() {
                Ok(path) => return Ok(path),
                Err(e) => match candidate.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => candidate = parent,
                    _ => {
                        return std::env::current_dir()
                            .and_then(|cwd| cwd.canonicalize())
                            .map_err(|_| e);
                    }
                },
            }
        }
    }
}

impl StorageProbe for VolumeStorageProbe {
    fn used_bytes(&self) -> io::Result<u64> {
        if !self.downloads_dir.exists() {
            return Ok(0);
        }

        let mut total = 0u64;
        for entry in WalkDir::new(&self.downloads_dir) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                total = total.saturating_add(entry.metadata().map_err(io::Error::from)?.len());
            }
        }
        Ok(total)
    }

    fn available_bytes(&self) -> io::Result<u64> {
        let dir = self.resolved_dir()?;
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| dir.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(sysinfo::Disk::available_space)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted volume contains {}", dir.display()),
                )
            })
    }
}
