//! Recording lifecycle hook.
//!
//! The queue never calls into library bookkeeping directly. Instead the
//! host registers a hook and reacts to recording-level lifecycle changes,
//! which keeps the dependency one-way.

use async_trait::async_trait;

/// Callbacks for recording-level lifecycle changes.
///
/// All methods default to no-ops. Errors are the hook's own business: the
/// queue has already committed the state change when a callback runs.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait RecordingHook: Send + Sync {
    /// Every track of the recording reached `Completed`.
    ///
    /// Fires once per completion episode; re-enqueuing a track of the
    /// recording starts a new episode.
    async fn on_recording_complete(&self, _recording_id: &str, _track_count: usize) {}

    /// The recording was marked for deletion as a whole.
    async fn on_recording_marked_for_deletion(&self, _recording_id: &str) {}

    /// A recording-level soft delete was undone.
    async fn on_recording_restored(&self, _recording_id: &str) {}

    /// Cleanup removed the last task record of the recording.
    async fn on_recording_purged(&self, _recording_id: &str) {}
}

/// Hook that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecordingHook;

impl RecordingHook for NoopRecordingHook {}
