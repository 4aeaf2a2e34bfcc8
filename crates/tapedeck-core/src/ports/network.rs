//! Network policy port.

use std::sync::atomic::{AtomicBool, Ordering};

/// Predicate consulted before every admission pass.
///
/// Used for constraints like "Wi-Fi only". The host platform decides;
/// the queue only asks.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait NetworkPolicy: Send + Sync {
    /// Whether transfers may start right now.
    fn can_transfer_now(&self) -> bool;
}

/// Policy that never blocks transfers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAllow;

impl NetworkPolicy for AlwaysAllow {
    fn can_transfer_now(&self) -> bool {
        true
    }
}

/// Policy backed by a flag the host flips (e.g. on Wi-Fi state changes).
#[derive(Debug)]
pub struct ToggleNetworkPolicy {
    allowed: AtomicBool,
}

impl ToggleNetworkPolicy {
    /// Create a policy with an initial state.
    pub const fn new(allowed: bool) -> Self {
        Self {
            allowed: AtomicBool::new(allowed),
        }
    }

    /// Update the state. Callers should poke the manager afterwards so the
    /// queue is re-evaluated.
    pub fn set_allowed(&self, allowed: bool) {
        self.allowed.store(allowed, Ordering::SeqCst);
    }
}

impl NetworkPolicy for ToggleNetworkPolicy {
    fn can_transfer_now(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }
}
