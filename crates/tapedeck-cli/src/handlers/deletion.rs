//! Soft-delete handlers.

use chrono::Utc;

use super::deletion_target;
use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::format_bytes;

pub async fn mark(ctx: &CliContext, id: &str, recording: bool) -> Result<(), CliError> {
    let target = deletion_target(id, recording);
    let marked = ctx.manager().mark_for_deletion(&target).await?;
    let days = ctx.config.queue.grace_period().num_days();
    println!(
        "Marked {} task(s) of {target} for deletion; they are purged after {days} day(s) unless restored.",
        marked.len()
    );
    Ok(())
}

pub async fn restore(ctx: &CliContext, id: &str, recording: bool) -> Result<(), CliError> {
    let target = deletion_target(id, recording);
    let restored = ctx.manager().restore(&target).await?;
    println!("Restored {} task(s) of {target}.", restored.len());
    Ok(())
}

/// Purge expired soft deletes, with the configured or an explicit grace.
pub async fn cleanup(ctx: &CliContext, grace_secs: Option<u64>) -> Result<(), CliError> {
    let report = match grace_secs {
        Some(secs) => {
            let grace = i64::try_from(secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .ok_or_else(|| CliError::Arguments(format!("grace of {secs}s is too large")))?;
            ctx.manager().cleanup(Utc::now(), grace).await?
        }
        None => ctx.manager().cleanup_expired().await?,
    };

    println!(
        "Purged {} task(s), freed {}.",
        report.removed.len(),
        format_bytes(report.bytes_freed)
    );
    if report.file_errors > 0 {
        println!("{} file(s) could not be removed.", report.file_errors);
    }
    if report.record_errors > 0 {
        println!(
            "{} record(s) could not be removed; they stay marked for the next cleanup.",
            report.record_errors
        );
    }
    Ok(())
}
