//! Checkpoint pacing for the progress bridge.
//!
//! Events go out on every bridge tick, but the task row is only rewritten
//! once per checkpoint interval so a fast transfer is not a write per chunk.

use std::time::{Duration, Instant};

/// Decides when the next progress checkpoint may be written.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_write: Option<Instant>,
}

impl ProgressThrottle {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_write: None,
        }
    }

    /// True for the first call and then at most once per interval.
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    fn ready_at(&mut self, now: Instant) -> bool {
        let due = self
            .last_write
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last_write = Some(now);
        }
        due
    }
}
