//! Core domain types and port definitions for tapedeck.
//!
//! This crate holds the download task model, its status state machine,
//! the retry policy, queue configuration and every port (trait) the
//! download manager consumes. It performs no I/O of its own apart from
//! resolving default data paths.
//!
//! # Structure
//!
//! - `download` - Task model, events, errors, retry policy, queue DTOs
//! - `config` - `QueueConfig` with builder and JSON loading
//! - `paths` - Platform data directories
//! - `ports` - Trait abstractions implemented by adapters
#![deny(unused_crate_dependencies)]

pub mod config;
pub mod download;
pub mod paths;
pub mod ports;

pub use config::QueueConfig;
pub use download::{
    DeletionTarget, DownloadError, DownloadEvent, DownloadResult, DownloadTask, QueueSnapshot,
    QueueStats, RecordingStatus, RetryDecision, RetryKind, RetryPolicy, TaskId, TaskStatus,
    TrackFile,
};
pub use paths::{PathError, data_root, database_path, default_downloads_dir};
pub use ports::{
    AlwaysAllow, CatalogResolver, DownloadEventEmitterPort, FormatFilter, NetworkPolicy,
    NoopRecordingHook, PreferredFormatFilter, RecordingHook, RepositoryError, StatusUpdate,
    StorageProbe, TaskStore, ToggleNetworkPolicy, TransferClient, TransferProgress,
    TransferRequest,
};
