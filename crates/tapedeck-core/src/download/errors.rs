//! Errors raised by the queue, its ports and the transfer workers.
//!
//! Every variant is plain data so failures can be stored on a task row and
//! sent over the event channel; `std::io::Error` is flattened to kind and text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::TaskStatus;
use crate::ports::RepositoryError;

/// Error type for download queue operations.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadError {
    /// Reading the source or writing the destination file failed.
    #[error("I/O error ({kind}): {message}")]
    Io {
        /// `std::io::ErrorKind` rendered with `Debug`.
        kind: String,
        message: String,
    },

    /// Network/HTTP error reported by the transfer client.
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Status reported by the remote end, when there was one.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// The source file or recording is gone.
    #[error("Not found: {message}")]
    NotFound {
        /// What was not found.
        message: String,
    },

    /// No task with this id in the store.
    #[error("Task not found: {id}")]
    TaskNotFound {
        /// The missing task id.
        id: String,
    },

    /// The requested status change is not allowed from the current status.
    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task id.
        id: String,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// Not enough free space on the downloads volume.
    #[error("insufficient storage: need {required} bytes, {available} available")]
    InsufficientStorage {
        /// Bytes the transfer needs.
        required: u64,
        /// Bytes free on the volume.
        available: u64,
    },

    /// The task store failed.
    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
    },

    /// The catalog could not resolve a recording into files.
    #[error("Resolution failed: {message}")]
    ResolutionFailed {
        message: String,
    },

    /// Invalid queue configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// The transfer was stopped by pause, cancel or shutdown.
    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn io(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            kind: kind.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        Self::io(format!("{:?}", err.kind()), err.to_string())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status_code: None,
        }
    }

    /// Network failure carrying the remote status code.
    pub fn network_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Network {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a task not found error.
    pub fn task_not_found(id: impl ToString) -> Self {
        Self::TaskNotFound { id: id.to_string() }
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(id: impl ToString, from: TaskStatus, to: TaskStatus) -> Self {
        Self::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn resolution_failed(message: impl Into<String>) -> Self {
        Self::ResolutionFailed {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Check if this error is worth an automatic retry.
    ///
    /// Informational only: the retry policy treats every failure alike.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Io { .. } | Self::Persistence { .. }
        )
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Message stored in the task's `error_message` column.
    ///
    /// Storage exhaustion is recorded with a fixed string so callers can
    /// detect it and prompt for cleanup.
    #[must_use]
    pub fn task_message(&self) -> String {
        match self {
            Self::InsufficientStorage { .. } => "insufficient storage".to_string(),
            other => other.to_string(),
        }
    }

    /// Text shown to people at the CLI.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Io { message, .. } => format!("Could not read or write the file: {message}"),
            Self::Network {
                message,
                status_code: Some(code),
            } => format!("Network error (HTTP {code}): {message}"),
            Self::Network { message, .. } => format!("Network error: {message}"),
            Self::NotFound { message } => format!("Source is missing: {message}"),
            Self::TaskNotFound { id } => format!("No download with id '{id}'."),
            Self::InvalidTransition { from, to, .. } => {
                format!("A {from} download cannot be made {to}.")
            }
            Self::InsufficientStorage {
                required,
                available,
            } => format!(
                "Not enough free space ({available} bytes free, {required} needed). \
                 Remove some downloads and try again."
            ),
            Self::Persistence { message } => format!("Could not save download state: {message}"),
            Self::ResolutionFailed { message } => format!("Could not list files: {message}"),
            Self::InvalidConfig { message } => format!("Invalid configuration: {message}"),
            Self::Cancelled => "The download was stopped.".to_string(),
        }
    }
}

impl From<RepositoryError> for DownloadError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::TaskNotFound { id },
            other => Self::Persistence {
                message: other.to_string(),
            },
        }
    }
}

/// Result alias used across the queue crates.
pub type DownloadResult<T> = Result<T, DownloadError>;
