//! Row mapping helpers for `SQLite` queries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tapedeck_core::{DownloadTask, RepositoryError, TaskId, TaskStatus};

/// Shared SELECT/RETURNING column list for task queries.
pub const TASK_COLUMNS: &str = "id, recording_id, track_filename, source_url, format, status, priority, enqueue_seq, progress_fraction, bytes_downloaded, total_bytes, resumed_from, retry_count, error_message, queued_at, started_at, completed_at, updated_at, local_path, is_marked_for_deletion, deletion_timestamp, last_access_timestamp";

/// Convert a timestamp to stored epoch milliseconds.
pub const fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert a byte count to the signed column type, saturating.
pub fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_millis(column: &str, millis: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        RepositoryError::Serialization(format!("{column}: timestamp {millis} out of range"))
    })
}

fn opt_from_millis(
    column: &str,
    millis: Option<i64>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    millis.map(|ms| from_millis(column, ms)).transpose()
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Parse a database row into a `DownloadTask`.
pub fn row_to_task(row: &SqliteRow) -> Result<DownloadTask, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(map_column_error)?;
    let status = TaskStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("unknown status '{status_str}'")))?;

    let priority: i64 = row.try_get("priority").map_err(map_column_error)?;
    let retry_count: i64 = row.try_get("retry_count").map_err(map_column_error)?;
    let bytes_downloaded: i64 = row.try_get("bytes_downloaded").map_err(map_column_error)?;
    let total_bytes: Option<i64> = row.try_get("total_bytes").map_err(map_column_error)?;
    let resumed_from: i64 = row.try_get("resumed_from").map_err(map_column_error)?;
    let local_path: Option<String> = row.try_get("local_path").map_err(map_column_error)?;
    let marked: i64 = row
        .try_get("is_marked_for_deletion")
        .map_err(map_column_error)?;

    Ok(DownloadTask {
        id: TaskId::from_raw(row.try_get::<String, _>("id").map_err(map_column_error)?),
        recording_id: row.try_get("recording_id").map_err(map_column_error)?,
        track_filename: row.try_get("track_filename").map_err(map_column_error)?,
        source_url: row.try_get("source_url").map_err(map_column_error)?,
        format: row.try_get("format").map_err(map_column_error)?,
        status,
        priority: i32::try_from(priority)
            .map_err(|_| RepositoryError::Serialization(format!("priority {priority}")))?,
        enqueue_seq: row.try_get("enqueue_seq").map_err(map_column_error)?,
        progress_fraction: row.try_get("progress_fraction").map_err(map_column_error)?,
        bytes_downloaded: to_u64(bytes_downloaded),
        total_bytes: total_bytes.map(to_u64),
        resumed_from: to_u64(resumed_from),
        retry_count: u32::try_from(retry_count).unwrap_or(0),
        error_message: row.try_get("error_message").map_err(map_column_error)?,
        queued_at: from_millis(
            "queued_at",
            row.try_get("queued_at").map_err(map_column_error)?,
        )?,
        started_at: opt_from_millis(
            "started_at",
            row.try_get("started_at").map_err(map_column_error)?,
        )?,
        completed_at: opt_from_millis(
            "completed_at",
            row.try_get("completed_at").map_err(map_column_error)?,
        )?,
        updated_at: from_millis(
            "updated_at",
            row.try_get("updated_at").map_err(map_column_error)?,
        )?,
        local_path: local_path.map(PathBuf::from),
        is_marked_for_deletion: marked != 0,
        deletion_timestamp: opt_from_millis(
            "deletion_timestamp",
            row.try_get("deletion_timestamp").map_err(map_column_error)?,
        )?,
        last_access_timestamp: from_millis(
            "last_access_timestamp",
            row.try_get("last_access_timestamp")
                .map_err(map_column_error)?,
        )?,
    })
}

/// Map a column decode failure.
pub fn map_column_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(format!("Column read error: {e}"))
}

/// Map a query failure, surfacing constraint violations distinctly.
pub fn map_sqlx_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if !matches!(db.kind(), sqlx::error::ErrorKind::Other) => {
            RepositoryError::Constraint(db.message().to_string())
        }
        _ => RepositoryError::Storage(e.to_string()),
    }
}
