//! Queue manager configuration.
//!
//! `QueueConfig` carries every tunable of the download manager. It can be
//! built in code with the `with_*` methods or loaded from a JSON file;
//! missing keys fall back to the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::download::{DownloadError, RetryPolicy};

/// Default number of concurrent transfers.
pub const DEFAULT_MAX_CONCURRENT: u32 = 2;

/// Default soft-delete grace period (7 days).
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 7 * 24 * 60 * 60;

/// Default low-space threshold (500 MiB).
pub const DEFAULT_LOW_SPACE_THRESHOLD_BYTES: u64 = 500 * 1024 * 1024;

/// Configuration for the download manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Root directory for downloaded recordings.
    pub downloads_directory: PathBuf,
    /// Maximum concurrent transfers.
    pub max_concurrent: u32,
    /// How long a soft-deleted task survives before cleanup may purge it.
    pub grace_period_secs: u64,
    /// Free space below which new work triggers a `StorageLow` signal.
    pub low_space_threshold_bytes: u64,
    /// When set, a low-space signal runs an immediate cleanup with this
    /// (shorter) grace period.
    pub low_space_cleanup_grace_secs: Option<u64>,
    /// Automatic retry budget and backoff.
    pub retry: RetryPolicy,
    /// Apply the automatic retry policy as soon as a transfer fails.
    pub auto_retry_on_failure: bool,
    /// Period of the maintenance tick (stranded tasks, retries, cleanup).
    pub maintenance_interval_secs: u64,
    /// Minimum time between persisted progress checkpoints.
    pub progress_checkpoint_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            downloads_directory: PathBuf::from("downloads"),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            low_space_threshold_bytes: DEFAULT_LOW_SPACE_THRESHOLD_BYTES,
            low_space_cleanup_grace_secs: None,
            retry: RetryPolicy::default(),
            auto_retry_on_failure: false,
            maintenance_interval_secs: 60,
            progress_checkpoint_ms: 1000,
        }
    }
}

impl QueueConfig {
    /// Create a new config with the downloads directory.
    #[must_use]
    pub fn new(downloads_directory: PathBuf) -> Self {
        Self {
            downloads_directory,
            ..Default::default()
        }
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, DownloadError> {
        let raw = std::fs::read_to_string(path).map_err(|e| DownloadError::from_io_error(&e))?;
        Self::from_json_str(&raw)
    }

    /// Parse a config from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self, DownloadError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| DownloadError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the maximum concurrent transfers.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the soft-delete grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_secs = grace.as_secs();
        self
    }

    /// Set the low-space threshold.
    #[must_use]
    pub const fn with_low_space_threshold(mut self, bytes: u64) -> Self {
        self.low_space_threshold_bytes = bytes;
        self
    }

    /// Run an opportunistic cleanup with this grace when space runs low.
    #[must_use]
    pub const fn with_low_space_cleanup_grace(mut self, grace: Option<Duration>) -> Self {
        self.low_space_cleanup_grace_secs = match grace {
            Some(g) => Some(g.as_secs()),
            None => None,
        };
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable automatic retry when a transfer fails.
    #[must_use]
    pub const fn with_auto_retry_on_failure(mut self, enabled: bool) -> Self {
        self.auto_retry_on_failure = enabled;
        self
    }

    /// Set the maintenance tick period.
    #[must_use]
    pub const fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval_secs = interval.as_secs();
        self
    }

    /// Set the progress checkpoint interval.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_progress_checkpoint(mut self, interval: Duration) -> Self {
        self.progress_checkpoint_ms = interval.as_millis() as u64;
        self
    }

    /// Grace period as a timestamp delta.
    pub fn grace_period(&self) -> chrono::Duration {
        secs_to_delta(self.grace_period_secs)
    }

    /// Shortened grace used when space runs low.
    pub fn low_space_cleanup_grace(&self) -> Option<chrono::Duration> {
        self.low_space_cleanup_grace_secs.map(secs_to_delta)
    }

    /// Maintenance tick period.
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Progress checkpoint interval.
    pub const fn progress_checkpoint(&self) -> Duration {
        Duration::from_millis(self.progress_checkpoint_ms)
    }

    /// Reject configurations the manager cannot run with.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.max_concurrent == 0 {
            return Err(DownloadError::invalid_config(
                "max_concurrent must be at least 1",
            ));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(DownloadError::invalid_config(
                "maintenance_interval_secs must be at least 1",
            ));
        }
        if let Some(short) = self.low_space_cleanup_grace_secs {
            if short > self.grace_period_secs {
                return Err(DownloadError::invalid_config(
                    "low_space_cleanup_grace_secs cannot exceed grace_period_secs",
                ));
            }
        }
        Ok(())
    }
}

fn secs_to_delta(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}
