//! Command handlers.
//!
//! Handlers follow one pattern:
//! - Signature: `pub async fn <command>(ctx: &CliContext, ...) -> Result<(), CliError>`
//! - Parse CLI-specific input, call one manager operation, print the result
//!
//! Queue semantics live in the manager; handlers never touch the store.

pub mod control;
pub mod deletion;
pub mod queue;
pub mod run;

use tapedeck_core::{DeletionTarget, TaskId};

/// Build a deletion target from a positional id and the `--recording` flag.
pub fn deletion_target(id: &str, recording: bool) -> DeletionTarget {
    if recording {
        DeletionTarget::Recording(id.to_string())
    } else {
        DeletionTarget::Task(TaskId::from_raw(id))
    }
}
