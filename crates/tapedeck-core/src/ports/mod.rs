//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the download manager expects from
//! infrastructure. They contain no implementation details and use only
//! domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` types in any signature
//! - Repository traits are CRUD-focused; policy lives in the manager
//! - Collaborators outside the queue (transfer, catalog, network, hooks)
//!   are consumed through these traits only

pub mod catalog;
pub mod download_event_emitter;
pub mod network;
pub mod recording_hook;
pub mod storage;
pub mod task_store;
pub mod transfer;

use thiserror::Error;

pub use catalog::{CatalogResolver, FormatFilter, PreferredFormatFilter};
pub use download_event_emitter::DownloadEventEmitterPort;
pub use network::{AlwaysAllow, NetworkPolicy, ToggleNetworkPolicy};
pub use recording_hook::{NoopRecordingHook, RecordingHook};
pub use storage::StorageProbe;
pub use task_store::{StatusUpdate, TaskStore};
pub use transfer::{TransferClient, TransferProgress, TransferRequest};

/// Domain-specific errors for repository operations.
///
/// This error type abstracts away storage implementation details (e.g., sqlx
/// errors) and provides a clean interface for the manager to handle storage
/// failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage backend error (database, filesystem, etc.).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored value could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A constraint was violated (e.g., CHECK on the soft-delete columns).
    #[error("Constraint violation: {0}")]
    Constraint(String),
}
