//! Retry/recovery policy.
//!
//! Pure decision logic: given a task's status and retry count, decide
//! whether it may go back to the queue and with which retry count.
//! No async, no IO, no tracing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::TaskStatus;

/// Who asked for the retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryKind {
    /// User-initiated. Allowed from `Failed` or `Cancelled`, not counted.
    Manual,
    /// Budgeted retry of a `Failed` task.
    Automatic { max_retries: u32 },
}

/// Why a retry was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The task's status does not allow this kind of retry.
    NotRetryable(TaskStatus),
    /// The automatic budget is spent; only a manual retry can requeue it.
    BudgetExhausted { retry_count: u32, max_retries: u32 },
}

/// Outcome of a retry decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Set status `Queued`, reset progress, clear the error, store `retry_count`.
    Requeue { retry_count: u32 },
    /// Leave the task as it is.
    Reject(RejectReason),
}

impl RetryDecision {
    /// Whether the task goes back to the queue.
    pub const fn is_requeue(&self) -> bool {
        matches!(self, Self::Requeue { .. })
    }
}

/// Decide whether a task may be requeued.
pub const fn decide(status: TaskStatus, retry_count: u32, kind: RetryKind) -> RetryDecision {
    match (kind, status) {
        (RetryKind::Manual, TaskStatus::Failed | TaskStatus::Cancelled) => {
            RetryDecision::Requeue { retry_count }
        }
        (RetryKind::Automatic { max_retries }, TaskStatus::Failed) => {
            if retry_count < max_retries {
                RetryDecision::Requeue {
                    retry_count: retry_count.saturating_add(1),
                }
            } else {
                RetryDecision::Reject(RejectReason::BudgetExhausted {
                    retry_count,
                    max_retries,
                })
            }
        }
        (_, status) => RetryDecision::Reject(RejectReason::NotRetryable(status)),
    }
}

/// Automatic retry budget and backoff.
///
/// Backoff for the n-th automatic retry is `backoff_base_secs * 2^n`,
/// capped at `backoff_max_secs`. A zero base makes failed tasks eligible
/// immediately.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_secs: 0,
            backoff_max_secs: 3600,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given budget and no backoff.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Set the exponential backoff base and cap (seconds).
    #[must_use]
    pub const fn with_backoff(mut self, base_secs: u64, max_secs: u64) -> Self {
        self.backoff_base_secs = base_secs;
        self.backoff_max_secs = max_secs;
        self
    }

    /// Delay before a task that has been retried `retry_count` times may go again.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        if self.backoff_base_secs == 0 {
            return Duration::zero();
        }
        let factor = 1u64.checked_shl(retry_count.min(32)).unwrap_or(u64::MAX);
        let secs = self
            .backoff_base_secs
            .saturating_mul(factor)
            .min(self.backoff_max_secs);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    /// Whether the backoff for a task that failed at `failed_at` has elapsed.
    pub fn is_due(&self, retry_count: u32, failed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - failed_at >= self.backoff_for(retry_count)
    }

    /// The automatic decision under this policy's budget.
    pub const fn decide_automatic(&self, status: TaskStatus, retry_count: u32) -> RetryDecision {
        decide(
            status,
            retry_count,
            RetryKind::Automatic {
                max_retries: self.max_retries,
            },
        )
    }
}
