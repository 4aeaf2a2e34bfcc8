//! Main CLI parser and global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Queue, download and tidy up concert recordings.
#[derive(Debug, Parser)]
#[command(name = "tapedeck")]
#[command(about = "Manage the tapedeck download queue")]
#[command(version)]
pub struct Cli {
    /// Data directory holding the task database and downloads
    #[arg(long = "data-dir", global = true, env = "TAPEDECK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Queue configuration file (JSON)
    #[arg(long = "config", global = true, env = "TAPEDECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the number of simultaneous downloads
    #[arg(long = "max-concurrent", global = true)]
    pub max_concurrent: Option<u32>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}
