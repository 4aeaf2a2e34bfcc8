//! Opening the task database and creating its schema.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

/// Open (creating if needed) the task database at `db_path`.
///
/// The pool runs in WAL mode so progress checkpoints do not block the
/// queries behind `list` and `stats`.
///
/// # Example
///
/// ```rust,no_run
/// use tapedeck_db::setup_database;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let pool = setup_database(Path::new("/var/lib/tapedeck/tapedeck.db")).await?;
/// # Ok(())
/// # }
/// ```
pub async fn setup_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5)),
    )
    .await?;

    create_schema(&pool).await?;

    tracing::debug!(path = %db_path.display(), "Task database ready");

    Ok(pool)
}

/// In-memory database with the full schema.
///
/// Every connection to `sqlite::memory:` opens its own empty database, so
/// the pool is pinned to a single connection.
#[cfg(any(test, feature = "test-utils"))]
pub async fn setup_test_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        // The database lives only as long as its single connection
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Idempotent (`IF NOT EXISTS` throughout). Timestamps are Unix epoch
/// milliseconds.
pub(crate) async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_tasks (
            id TEXT PRIMARY KEY NOT NULL,
            recording_id TEXT NOT NULL,
            track_filename TEXT NOT NULL,
            source_url TEXT NOT NULL,
            format TEXT,
            status TEXT NOT NULL CHECK (status IN
                ('queued', 'downloading', 'paused', 'completed', 'failed', 'cancelled')),
            priority INTEGER NOT NULL DEFAULT 0,
            enqueue_seq INTEGER NOT NULL,
            progress_fraction REAL,
            bytes_downloaded INTEGER NOT NULL DEFAULT 0,
            total_bytes INTEGER,
            resumed_from INTEGER NOT NULL DEFAULT 0,
            retry_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            queued_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER,
            updated_at INTEGER NOT NULL,
            local_path TEXT,
            is_marked_for_deletion INTEGER NOT NULL DEFAULT 0,
            deletion_timestamp INTEGER,
            last_access_timestamp INTEGER NOT NULL,
            UNIQUE (recording_id, track_filename),
            CHECK (is_marked_for_deletion = 0 OR deletion_timestamp IS NOT NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before resume offsets were tracked
    let _ = sqlx::query(
        "ALTER TABLE download_tasks ADD COLUMN resumed_from INTEGER NOT NULL DEFAULT 0",
    )
    .execute(pool)
    .await;
    // Fails harmlessly when the column exists

    // Admission scans and counters filter on status
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON download_tasks(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_recording ON download_tasks(recording_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_marked ON download_tasks(is_marked_for_deletion)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
