//! CLI bootstrap - the composition root.
//!
//! This module is the only place where infrastructure is wired together
//! for the CLI:
//! - SQLite pool and task store (via tapedeck-db)
//! - Local transfer client and volume storage probe (via tapedeck-download)
//! - Broadcast event emitter, so `run` can report progress
//!
//! Handlers receive the composed `CliContext` and call the manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tapedeck_core::{AlwaysAllow, NoopRecordingHook, PreferredFormatFilter, QueueConfig};
use tapedeck_core::{database_path, default_downloads_dir};
use tapedeck_db::StoreFactory;
use tapedeck_download::{
    BroadcastEmitter, DownloadManagerDeps, DownloadManagerImpl, LocalFileTransfer,
    VolumeStorageProbe, build_download_manager,
};

/// Bootstrap configuration for the CLI.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Path of the task database.
    pub database_path: PathBuf,
    /// Queue settings, including the downloads directory.
    pub queue: QueueConfig,
}

impl CliConfig {
    /// Config rooted at the platform data directory.
    pub fn with_defaults() -> Result<Self> {
        Ok(Self {
            database_path: database_path()?,
            queue: QueueConfig::new(default_downloads_dir()?),
        })
    }

    /// Config rooted at an explicit data directory.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            database_path: data_dir.join("tapedeck.db"),
            queue: QueueConfig::new(data_dir.join("downloads")),
        }
    }

    /// Resolve the config from global flags.
    ///
    /// A config file replaces the default queue settings wholesale;
    /// `max_concurrent` is applied on top of either.
    pub fn resolve(
        data_dir: Option<&Path>,
        config_file: Option<&Path>,
        max_concurrent: Option<u32>,
    ) -> Result<Self> {
        let mut config = match data_dir {
            Some(dir) => Self::in_dir(dir),
            None => Self::with_defaults()?,
        };

        if let Some(path) = config_file {
            config.queue = QueueConfig::from_json_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
        }
        if let Some(max) = max_concurrent {
            config.queue = config.queue.with_max_concurrent(max);
        }

        Ok(config)
    }
}

/// Fully composed context for CLI commands.
pub struct CliContext {
    /// The download manager.
    pub manager: Arc<DownloadManagerImpl>,
    /// Event stream of the manager.
    pub events: BroadcastEmitter,
    /// The configuration the manager was built with.
    pub config: CliConfig,
}

impl CliContext {
    /// Access the download manager.
    pub const fn manager(&self) -> &Arc<DownloadManagerImpl> {
        &self.manager
    }

    /// Access the event emitter.
    pub const fn events(&self) -> &BroadcastEmitter {
        &self.events
    }
}

/// Bootstrap the CLI application.
///
/// Opens (or creates) the database, then builds the manager around the
/// local-file transfer client. The manager is not started; only `run`
/// starts it.
pub async fn bootstrap(config: CliConfig) -> Result<CliContext> {
    let pool = StoreFactory::create_pool(&config.database_path).await?;
    let store = StoreFactory::task_store_port(pool);

    std::fs::create_dir_all(&config.queue.downloads_directory).with_context(|| {
        format!(
            "Failed to create {}",
            config.queue.downloads_directory.display()
        )
    })?;

    let events = BroadcastEmitter::with_defaults();
    let manager = build_download_manager(DownloadManagerDeps {
        store,
        transfer: Arc::new(LocalFileTransfer::new()),
        storage: Arc::new(VolumeStorageProbe::new(
            config.queue.downloads_directory.clone(),
        )),
        network: Arc::new(AlwaysAllow),
        catalog: None,
        format_filter: Arc::new(PreferredFormatFilter),
        hook: Arc::new(NoopRecordingHook),
        event_emitter: Arc::new(events.clone()),
        config: config.queue.clone(),
    })?;

    tracing::debug!(
        database = %config.database_path.display(),
        downloads = %config.queue.downloads_directory.display(),
        "CLI context ready"
    );

    Ok(CliContext {
        manager: Arc::new(manager),
        events,
        config,
    })
}
