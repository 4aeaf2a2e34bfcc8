//! Fan-out of queue events over a tokio broadcast channel.

use tokio::sync::broadcast;

use tapedeck_core::{DownloadEvent, DownloadEventEmitterPort};

/// Cloneable handle; every clone feeds the same subscribers.
///
/// A subscriber that falls more than `capacity` events behind skips ahead
/// and sees `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    sender: broadcast::Sender<DownloadEvent>,
}

impl BroadcastEmitter {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 256 buffered events, enough for a burst of progress ticks.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(256)
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl DownloadEventEmitterPort for BroadcastEmitter {
    fn emit(&self, event: DownloadEvent) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }
}
