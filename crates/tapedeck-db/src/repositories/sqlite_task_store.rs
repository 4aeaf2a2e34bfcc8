//! `SQLite` implementation of the `TaskStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use tapedeck_core::{DownloadTask, RepositoryError, StatusUpdate, TaskId, TaskStatus, TaskStore};

use super::row_mappers::{TASK_COLUMNS, map_sqlx_error, row_to_task, to_i64, to_millis};

/// `SQLite` implementation of the `TaskStore` trait.
///
/// Persists the download queue so it survives restarts. Status changes are
/// single `UPDATE ... WHERE status IN (...) RETURNING` statements, which
/// makes each transition atomic without an explicit transaction.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Create a new `SQLite` task store.
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing only).
    #[cfg(test)]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_where(
        &self,
        clause: &str,
        bind: Option<&str>,
    ) -> Result<Vec<DownloadTask>, RepositoryError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM download_tasks {clause}");
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;

        rows.iter().map(row_to_task).collect()
    }
}

fn now_millis() -> i64 {
    to_millis(Utc::now())
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn upsert(&self, task: &DownloadTask) -> Result<(), RepositoryError> {
        let local_path = task
            .local_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        sqlx::query(
            r#"
            INSERT INTO download_tasks (
                id, recording_id, track_filename, source_url, format, status,
                priority, enqueue_seq, progress_fraction, bytes_downloaded,
                total_bytes, resumed_from, retry_count, error_message, queued_at,
                started_at, completed_at, updated_at, local_path,
                is_marked_for_deletion, deletion_timestamp, last_access_timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                recording_id = excluded.recording_id,
                track_filename = excluded.track_filename,
                source_url = excluded.source_url,
                format = excluded.format,
                status = excluded.status,
                priority = excluded.priority,
                enqueue_seq = excluded.enqueue_seq,
                progress_fraction = excluded.progress_fraction,
                bytes_downloaded = excluded.bytes_downloaded,
                total_bytes = excluded.total_bytes,
                resumed_from = excluded.resumed_from,
                retry_count = excluded.retry_count,
                error_message = excluded.error_message,
                queued_at = excluded.queued_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                updated_at = excluded.updated_at,
                local_path = excluded.local_path,
                is_marked_for_deletion = excluded.is_marked_for_deletion,
                deletion_timestamp = excluded.deletion_timestamp,
                last_access_timestamp = excluded.last_access_timestamp
            "#,
        )
        .bind(task.id.as_str())
        .bind(&task.recording_id)
        .bind(&task.track_filename)
        .bind(&task.source_url)
        .bind(&task.format)
        .bind(task.status.as_str())
        .bind(i64::from(task.priority))
        .bind(task.enqueue_seq)
        .bind(task.progress_fraction)
        .bind(to_i64(task.bytes_downloaded))
        .bind(task.total_bytes.map(to_i64))
        .bind(to_i64(task.resumed_from))
        .bind(i64::from(task.retry_count))
        .bind(&task.error_message)
        .bind(to_millis(task.queued_at))
        .bind(task.started_at.map(to_millis))
        .bind(task.completed_at.map(to_millis))
        .bind(now_millis())
        .bind(local_path)
        .bind(i64::from(task.is_marked_for_deletion))
        .bind(task.deletion_timestamp.map(to_millis))
        .bind(to_millis(task.last_access_timestamp))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<DownloadTask>, RepositoryError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM download_tasks WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn list_all(&self) -> Result<Vec<DownloadTask>, RepositoryError> {
        self.fetch_where("ORDER BY enqueue_seq ASC, id ASC", None)
            .await
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
    ) -> Result<Vec<DownloadTask>, RepositoryError> {
        self.fetch_where(
            "WHERE status = ? ORDER BY enqueue_seq ASC, id ASC",
            Some(status.as_str()),
        )
        .await
    }

    async fn list_by_recording(
        &self,
        recording_id: &str,
    ) -> Result<Vec<DownloadTask>, RepositoryError> {
        self.fetch_where(
            "WHERE recording_id = ? ORDER BY enqueue_seq ASC, id ASC",
            Some(recording_id),
        )
        .await
    }

    async fn list_marked_for_deletion(&self) -> Result<Vec<DownloadTask>, RepositoryError> {
        self.fetch_where(
            "WHERE is_marked_for_deletion = 1 ORDER BY deletion_timestamp ASC, id ASC",
            None,
        )
        .await
    }

    async fn update_progress(
        &self,
        id: &TaskId,
        progress_fraction: Option<f64>,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    ) -> Result<(), RepositoryError> {
        let bytes = to_i64(bytes_downloaded);
        let total = total_bytes.map(to_i64);
        let fraction = progress_fraction.map(|f| f.clamp(0.0, 1.0));

        // MIN() with a NULL-free argument list clamps to the effective total
        let result = sqlx::query(
            r#"
            UPDATE download_tasks SET
                total_bytes = COALESCE(?, total_bytes),
                bytes_downloaded = MIN(?, COALESCE(?, total_bytes, ?)),
                progress_fraction = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total)
        .bind(bytes)
        .bind(total)
        .bind(bytes)
        .bind(fraction)
        .bind(now_millis())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Task with ID '{id}'")));
        }

        Ok(())
    }

    async fn transition(
        &self,
        id: &TaskId,
        allowed_from: &[TaskStatus],
        update: StatusUpdate,
    ) -> Result<Option<DownloadTask>, RepositoryError> {
        if allowed_from.is_empty() {
            return self
                .get(id)
                .await?
                .map(|_| None)
                .ok_or_else(|| RepositoryError::NotFound(format!("Task with ID '{id}'")));
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("UPDATE download_tasks SET status = ");
        qb.push_bind(update.status.as_str());
        qb.push(", updated_at = ").push_bind(now_millis());

        if let Some(message) = update.error_message {
            qb.push(", error_message = ").push_bind(message);
        }
        if let Some(started_at) = update.started_at {
            qb.push(", started_at = ").push_bind(started_at.map(to_millis));
        }
        if let Some(completed_at) = update.completed_at {
            qb.push(", completed_at = ")
                .push_bind(completed_at.map(to_millis));
        }
        if let Some(local_path) = update.local_path {
            qb.push(", local_path = ")
                .push_bind(local_path.map(|p| p.to_string_lossy().into_owned()));
        }
        if let Some(retry_count) = update.retry_count {
            qb.push(", retry_count = ").push_bind(i64::from(retry_count));
        }
        if let Some(resumed_from) = update.resumed_from {
            qb.push(", resumed_from = ").push_bind(to_i64(resumed_from));
        }
        if update.reset_progress {
            qb.push(
                ", bytes_downloaded = 0, \
                 progress_fraction = CASE WHEN total_bytes IS NULL THEN NULL ELSE 0.0 END",
            );
        } else if update.mark_complete {
            // Assignments read pre-update values, so both columns see the old row
            qb.push(
                ", progress_fraction = 1.0, \
                 bytes_downloaded = COALESCE(total_bytes, bytes_downloaded), \
                 total_bytes = COALESCE(total_bytes, bytes_downloaded)",
            );
        }
        if let Some(accessed_at) = update.accessed_at {
            qb.push(", last_access_timestamp = MAX(last_access_timestamp, ")
                .push_bind(to_millis(accessed_at))
                .push(")");
        }

        qb.push(" WHERE id = ").push_bind(id.as_str().to_owned());
        qb.push(" AND status IN (");
        let mut separated = qb.separated(", ");
        for status in allowed_from {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
        qb.push(" RETURNING ").push(TASK_COLUMNS);

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row_to_task(&row).map(Some),
            None => {
                if self.get(id).await?.is_some() {
                    Ok(None)
                } else {
                    Err(RepositoryError::NotFound(format!("Task with ID '{id}'")))
                }
            }
        }
    }

    async fn set_priority(&self, id: &TaskId, priority: i32) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE download_tasks SET priority = ?, updated_at = ? WHERE id = ?")
                .bind(i64::from(priority))
                .bind(now_millis())
                .bind(id.as_str())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Task with ID '{id}'")));
        }

        Ok(())
    }

    async fn set_deletion_mark(
        &self,
        id: &TaskId,
        marked_at: Option<DateTime<Utc>>,
        accessed_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE download_tasks SET
                is_marked_for_deletion = ?,
                deletion_timestamp = ?,
                last_access_timestamp = MAX(last_access_timestamp, COALESCE(?, last_access_timestamp)),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(marked_at.is_some()))
        .bind(marked_at.map(to_millis))
        .bind(accessed_at.map(to_millis))
        .bind(now_millis())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Task with ID '{id}'")));
        }

        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM download_tasks WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_if(
        &self,
        id: &TaskId,
        allowed_from: &[TaskStatus],
    ) -> Result<Option<DownloadTask>, RepositoryError> {
        if allowed_from.is_empty() {
            return Ok(None);
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("DELETE FROM download_tasks WHERE id = ");
        qb.push_bind(id.as_str().to_owned());
        qb.push(" AND status IN (");
        let mut separated = qb.separated(", ");
        for status in allowed_from {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
        qb.push(" RETURNING ").push(TASK_COLUMNS);

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn reset_interrupted(&self) -> Result<Vec<TaskId>, RepositoryError> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE download_tasks SET status = 'queued', updated_at = ?
            WHERE status = 'downloading'
            RETURNING id
            "#,
        )
        .bind(now_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(ids.into_iter().map(|(id,)| TaskId::from_raw(id)).collect())
    }

    async fn count_by_status(&self, status: TaskStatus) -> Result<u64, RepositoryError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM download_tasks WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn total_bytes_downloaded(&self) -> Result<u64, RepositoryError> {
        let (sum,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(bytes_downloaded), 0) FROM download_tasks WHERE status = 'completed'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(u64::try_from(sum).unwrap_or(0))
    }

    async fn next_enqueue_seq(&self) -> Result<i64, RepositoryError> {
        let (next,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(enqueue_seq), 0) + 1 FROM download_tasks")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(next)
    }
}
