//! Recording group tracker for the completion hook.
//!
//! Tracks which recordings have already fired their "all tracks complete"
//! notification, so concurrent track completions and repeated checks fire
//! it once per completion episode. A recording is reopened whenever one of
//! its tracks goes back to the queue.

use std::collections::HashSet;

use tapedeck_core::RecordingStatus;

/// Pure state tracker for recording completion.
///
/// No I/O or locking happens here; the manager holds it behind a mutex.
#[derive(Debug, Default)]
pub struct RecordingGroupTracker {
    /// Recordings whose completion has been announced.
    ///
    /// INVARIANT: a recording is present only while every one of its tasks
    /// is `Completed`. Anything that requeues a track must call `reopen`.
    fired: HashSet<String>,
}

impl RecordingGroupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a track completion.
    ///
    /// Returns `true` exactly once per episode: when `status` shows the
    /// whole recording complete and the completion has not been announced.
    pub fn on_track_completed(&mut self, status: &RecordingStatus) -> bool {
        if !status.is_complete() {
            return false;
        }
        self.fired.insert(status.recording_id.clone())
    }

    /// A track of the recording is queued again; allow a new announcement.
    pub fn reopen(&mut self, recording_id: &str) {
        self.fired.remove(recording_id);
    }

    #[cfg(test)]
    fn has_fired(&self, recording_id: &str) -> bool {
        self.fired.contains(recording_id)
    }
}
