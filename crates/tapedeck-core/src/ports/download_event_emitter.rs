//! Outbound port for queue events.
//!
//! The manager publishes every state change through this trait and never
//! learns who listens.

use crate::download::DownloadEvent;

/// Sink for [`DownloadEvent`]s.
///
/// Called from scheduler and worker tasks while they hold no locks, but
/// `emit` must still return promptly: buffer or drop, never wait for a
/// consumer.
pub trait DownloadEventEmitterPort: Send + Sync {
    fn emit(&self, event: DownloadEvent);
}
