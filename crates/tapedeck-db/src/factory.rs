//! Composition utilities for building stores with `SQLite` backends.
//!
//! This module provides factory functions for wiring up the download
//! manager with `SQLite` repositories. It is focused purely on construction
//! and should not contain any domain logic.

use std::path::Path;
use std::sync::Arc;

use sqlx::SqlitePool;
use tapedeck_core::TaskStore;

use crate::repositories::SqliteTaskStore;
use crate::setup::setup_database;

/// Factory for creating store instances with `SQLite` backends.
pub struct StoreFactory;

impl StoreFactory {
    /// Open (or create) the database file and apply the schema.
    pub async fn create_pool(db_path: &Path) -> anyhow::Result<SqlitePool> {
        setup_database(db_path).await
    }

    /// Create a task store from a pool.
    pub fn task_store(pool: SqlitePool) -> Arc<SqliteTaskStore> {
        Arc::new(SqliteTaskStore::new(pool))
    }

    /// Create a task store as the port trait object the manager consumes.
    pub fn task_store_port(pool: SqlitePool) -> Arc<dyn TaskStore> {
        Self::task_store(pool)
    }
}

/// Test database helper for integration tests.
///
/// Provides an in-memory `SQLite` database with full schema already applied.
/// Matches the production schema to ensure test parity.
#[cfg(any(test, feature = "test-utils"))]
pub struct TestDb {
    pool: SqlitePool,
}

#[cfg(any(test, feature = "test-utils"))]
impl TestDb {
    /// Create a new in-memory test database with full schema.
    pub async fn new() -> anyhow::Result<Self> {
        let pool = crate::setup::setup_test_database().await?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a task store backed by this database.
    pub fn task_store(&self) -> Arc<SqliteTaskStore> {
        StoreFactory::task_store(self.pool.clone())
    }
}
