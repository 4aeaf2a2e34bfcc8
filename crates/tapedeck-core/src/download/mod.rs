//! Download domain types, events, errors, and the retry policy.
//!
//! This module contains pure data types and decision logic for the
//! download queue. No I/O, networking, or runtime dependencies allowed.
//!
//! # Structure
//!
//! - `types` - Identifiers, the status state machine and `DownloadTask`
//! - `events` - Download events (`DownloadEvent`)
//! - `errors` - Error types for download operations
//! - `queue` - Query DTOs (`QueueSnapshot`, `RecordingStatus`, `QueueStats`)
//! - `retry` - Retry/recovery decisions and backoff

pub mod errors;
pub mod events;
pub mod queue;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use errors::{DownloadError, DownloadResult};
pub use events::DownloadEvent;
pub use queue::{QueueSnapshot, QueueStats, RecordingStatus};
pub use retry::{RejectReason, RetryDecision, RetryKind, RetryPolicy};
pub use types::{DeletionTarget, DownloadTask, TaskId, TaskStatus, TrackFile};
