//! Task control handlers: pause, resume, cancel, delete, retry, ordering.

use tapedeck_core::TaskId;

use crate::bootstrap::CliContext;
use crate::error::CliError;

pub async fn pause(ctx: &CliContext, id: &str) -> Result<(), CliError> {
    ctx.manager().pause(&TaskId::from_raw(id)).await?;
    println!("Paused {id}.");
    Ok(())
}

pub async fn resume(ctx: &CliContext, id: &str) -> Result<(), CliError> {
    ctx.manager().resume(&TaskId::from_raw(id)).await?;
    println!("Resumed {id}.");
    Ok(())
}

/// Cancel one task, or every unfinished task of a recording.
pub async fn cancel(ctx: &CliContext, id: &str, recording: bool) -> Result<(), CliError> {
    if recording {
        let cancelled = ctx.manager().cancel_recording(id).await?;
        println!("Cancelled {} task(s) of '{id}'.", cancelled.len());
    } else {
        ctx.manager().cancel(&TaskId::from_raw(id)).await?;
        println!("Cancelled {id}.");
    }
    Ok(())
}

/// Remove a task and its file right away (no grace period).
pub async fn delete(ctx: &CliContext, id: &str) -> Result<(), CliError> {
    if ctx.manager().delete(&TaskId::from_raw(id)).await? {
        println!("Deleted {id}.");
        Ok(())
    } else {
        Err(CliError::Arguments(format!("no task with id '{id}'")))
    }
}

pub async fn retry(ctx: &CliContext, id: &str) -> Result<(), CliError> {
    ctx.manager()
        .retry_failed_download(&TaskId::from_raw(id))
        .await?;
    println!("Requeued {id}.");
    Ok(())
}

pub async fn retry_all(ctx: &CliContext) -> Result<(), CliError> {
    let requeued = ctx.manager().retry_all_failed_downloads().await?;
    println!("Requeued {} failed task(s).", requeued.len());
    Ok(())
}

/// Requeue failed tasks whose retry count is below `max_retries`.
pub async fn auto_retry(ctx: &CliContext, max_retries: u32) -> Result<(), CliError> {
    let requeued = ctx.manager().auto_retry_downloads(max_retries).await?;
    println!(
        "Requeued {} failed task(s) (budget {max_retries}).",
        requeued.len()
    );
    Ok(())
}

pub async fn reorder(ctx: &CliContext, ids: &[String]) -> Result<(), CliError> {
    let ordered: Vec<TaskId> = ids.iter().map(TaskId::from_raw).collect();
    ctx.manager().reorder_queue(&ordered).await?;
    println!("Reordered {} task(s).", ordered.len());
    Ok(())
}

pub async fn clear(ctx: &CliContext) -> Result<(), CliError> {
    let removed = ctx.manager().clear_queue().await?;
    println!("Removed {removed} queued task(s).");
    Ok(())
}

pub async fn priority(ctx: &CliContext, id: &str, priority: i32) -> Result<(), CliError> {
    let task_id = TaskId::from_raw(id);
    if ctx.manager().get_task(&task_id).await?.is_none() {
        return Err(CliError::Arguments(format!("no task with id '{id}'")));
    }
    ctx.manager().set_priority(&task_id, priority).await?;
    println!("Priority of {id} set to {priority}.");
    Ok(())
}
