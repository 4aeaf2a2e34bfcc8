//! Platform data paths.
//!
//! Resolution order for the data root:
//! 1. `TAPEDECK_DATA_DIR` environment variable
//! 2. `<platform local data dir>/tapedeck`

use std::env;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV: &str = "TAPEDECK_DATA_DIR";

/// Errors resolving or creating data directories.
#[derive(Debug, Error)]
pub enum PathError {
    /// The platform has no local data directory.
    #[error("Could not determine a local data directory")]
    NoDataDir,

    /// Creating a directory failed.
    #[error("Failed to create {path}: {reason}")]
    CreateFailed {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },
}

/// Root directory for tapedeck data, created if missing.
pub fn data_root() -> Result<PathBuf, PathError> {
    let root = match env::var(DATA_DIR_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => dirs::data_local_dir()
            .ok_or(PathError::NoDataDir)?
            .join("tapedeck"),
    };
    ensure_dir(root)
}

/// Default downloads directory (`<data root>/downloads`).
pub fn default_downloads_dir() -> Result<PathBuf, PathError> {
    ensure_dir(data_root()?.join("downloads"))
}

/// Path of the SQLite database file (`<data root>/tapedeck.db`).
pub fn database_path() -> Result<PathBuf, PathError> {
    Ok(data_root()?.join("tapedeck.db"))
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, PathError> {
    if !path.exists() {
        fs::create_dir_all(&path).map_err(|e| PathError::CreateFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "Created data directory");
    }
    Ok(path)
}
