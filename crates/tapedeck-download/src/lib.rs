//! Download queue and lifecycle manager for tapedeck.
//!
//! Owns everything between "the user asked for these tracks" and "the files
//! are on disk (or deliberately gone)":
//!
//! - `manager` - Queue scheduler, worker pool, lease-guarded finalization
//! - `queue` - Pure admission ordering and reorder arithmetic
//! - `storage` - Storage admission control and the volume probe
//! - `reconciler` - Soft-delete marking, restore and grace-period cleanup
//! - `progress` - Checkpoint throttling and speed smoothing
//! - `transfer` - Local `file://` transfer client
//! - `emitter` - Broadcast event emitter for pub/sub consumers
//!
//! The network transfer itself, catalog lookups and network policy are
//! consumed through the ports in `tapedeck_core::ports`.

// Re-export core types for convenience
pub use tapedeck_core::download::{
    DeletionTarget, DownloadError, DownloadEvent, DownloadResult, DownloadTask, QueueSnapshot,
    QueueStats, RecordingStatus, TaskId, TaskStatus, TrackFile,
};
pub use tapedeck_core::ports::{
    CatalogResolver, DownloadEventEmitterPort, FormatFilter, NetworkPolicy, RecordingHook,
    StorageProbe, TaskStore, TransferClient,
};

// Internal modules (pub(crate) to keep implementation private)
pub(crate) mod progress;
pub(crate) mod queue;

mod emitter;
mod manager;
mod reconciler;
mod storage;
mod transfer;

// Re-export progress throttle for consumers (adapters)
pub use progress::ProgressThrottle;

pub use emitter::BroadcastEmitter;
pub use manager::{
    DownloadDestination, DownloadManagerDeps, DownloadManagerImpl, build_download_manager,
};
pub use reconciler::{CleanupReport, SoftDeleteReconciler};
pub use storage::{StorageAdmission, VolumeStorageProbe};
pub use transfer::LocalFileTransfer;
