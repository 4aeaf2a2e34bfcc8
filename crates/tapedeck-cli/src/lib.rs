//! Command-line front end for the tapedeck download queue.
//!
//! The binary in `main.rs` is the composition root: `bootstrap` wires the
//! SQLite task store, the local transfer client, the volume storage probe
//! and a broadcast emitter into a `DownloadManagerImpl`, and each command
//! handler is a thin wrapper over one manager operation.
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use tempfile as _;

// Used by the binary only
use dotenvy as _;
use tracing_subscriber as _;

pub mod bootstrap;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod presentation;

pub use bootstrap::{CliConfig, CliContext, bootstrap};
pub use commands::Commands;
pub use error::CliError;
pub use parser::Cli;
