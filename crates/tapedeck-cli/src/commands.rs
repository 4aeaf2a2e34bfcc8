//! Subcommands of the `tapedeck` binary.

use clap::Subcommand;

/// Available commands.
///
/// Everything except `run` only edits the queue; transfers happen while
/// `run` is active.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Process the queue until interrupted (or until idle)
    Run {
        /// Exit once nothing is queued or downloading
        #[arg(long)]
        until_idle: bool,
    },

    /// Add tracks of a recording to the queue
    Enqueue {
        /// Recording identifier (e.g. "gd1977-05-08.sbd.hicks.4982.sbeok.shnf")
        recording_id: String,
        /// Track sources: `file://` URLs or local paths
        #[arg(required = true)]
        sources: Vec<String>,
        /// Admission priority (higher goes first)
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,
    },

    /// List tasks
    List {
        /// Only show tasks in this status (queued, downloading, ...)
        #[arg(short, long)]
        status: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show queue statistics
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the aggregate status of one recording
    Recording {
        /// Recording identifier
        recording_id: String,
    },

    /// Pause a queued or running task
    Pause {
        /// Task ID
        id: String,
    },

    /// Put a paused task back in the queue
    Resume {
        /// Task ID
        id: String,
    },

    /// Cancel a task, or every unfinished task of a recording
    Cancel {
        /// Task ID (or recording ID with --recording)
        id: String,
        /// Treat the identifier as a recording
        #[arg(long)]
        recording: bool,
    },

    /// Remove a task and its file immediately
    Delete {
        /// Task ID
        id: String,
    },

    /// Retry a failed or cancelled task
    Retry {
        /// Task ID
        id: String,
    },

    /// Retry every failed task
    RetryAll,

    /// Requeue failed tasks that are still within a retry budget
    AutoRetry {
        /// Maximum automatic retries per task
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
    },

    /// Set the admission order of queued tasks (first goes first)
    Reorder {
        /// Task IDs in the desired order
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Remove every queued task
    Clear,

    /// Change the priority of a task
    Priority {
        /// Task ID
        id: String,
        /// New priority
        #[arg(allow_negative_numbers = true)]
        priority: i32,
    },

    /// Soft-delete a task or recording (reversible until cleanup)
    MarkDelete {
        /// Task ID (or recording ID with --recording)
        id: String,
        /// Treat the identifier as a recording
        #[arg(long)]
        recording: bool,
    },

    /// Undo a soft delete
    Restore {
        /// Task ID (or recording ID with --recording)
        id: String,
        /// Treat the identifier as a recording
        #[arg(long)]
        recording: bool,
    },

    /// Purge soft-deleted tasks whose grace period has elapsed
    Cleanup {
        /// Grace period in seconds (defaults to the configured one)
        #[arg(long)]
        grace_secs: Option<u64>,
    },
}
