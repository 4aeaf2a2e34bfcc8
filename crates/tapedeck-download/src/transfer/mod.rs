//! Transfer client adapters.
//!
//! The network client lives with the host application; this crate ships a
//! local-file client used by the CLI for mirrored archives and by tests.

mod file_copy;

pub use file_copy::LocalFileTransfer;
