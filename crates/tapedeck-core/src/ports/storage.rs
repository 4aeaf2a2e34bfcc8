//! Storage probe port.

use std::io;

/// Reads live space figures for the downloads volume.
///
/// Implementations must not cache: each call reflects the filesystem at
/// the time of the call.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait StorageProbe: Send + Sync {
    /// Bytes currently used by downloaded content.
    fn used_bytes(&self) -> io::Result<u64>;

    /// Bytes free on the volume holding the downloads directory.
    fn available_bytes(&self) -> io::Result<u64>;
}
