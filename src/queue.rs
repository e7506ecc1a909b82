//! Durable FIFO of data payloads awaiting redelivery
//!
//! Backed by a single SQLite file holding one table:
//!
//! ```sql
//! CREATE TABLE Data (id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, message TEXT NOT NULL)
//! ```
//!
//! The file is created on the first enqueue. Every operation holds the same
//! lock for its whole duration, so a record handed out by one
//! [`OfflineQueue::dequeue_batch`] call is never seen by another.
//!
//! Records that fail redelivery are enqueued again and land at the tail.
//! Under repeated failures the queue therefore guarantees eventual
//! delivery, not strict FIFO across retries.

use crate::error::StorageError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A payload taken off the queue
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct QueuedRecord {
    pub id: i64,
    pub message: String,
}

pub struct OfflineQueue {
    path: PathBuf,
    pool: Mutex<Option<SqlitePool>>,
}

impl OfflineQueue {
    /// Queue backed by `path`; nothing touches the disk until first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a payload, creating the store if needed
    pub async fn enqueue(&self, message: &str) -> Result<(), StorageError> {
        let mut guard = self.pool.lock().await;
        let pool = self.open(&mut guard).await?;

        sqlx::query("INSERT INTO Data (message) VALUES (?)")
            .bind(message)
            .execute(&pool)
            .await?;

        debug!(path = %self.path.display(), "Queued payload for recovery");
        Ok(())
    }

    /// Take up to `max_count` of the oldest records, removing them in the
    /// same transaction
    pub async fn dequeue_batch(&self, max_count: usize) -> Result<Vec<QueuedRecord>, StorageError> {
        let mut guard = self.pool.lock().await;
        let Some(pool) = self.open_existing(&mut guard).await? else {
            return Ok(Vec::new());
        };

        let limit = i64::try_from(max_count).unwrap_or(i64::MAX);
        let mut tx = pool.begin().await?;

        let records: Vec<QueuedRecord> =
            sqlx::query_as("SELECT id, message FROM Data ORDER BY id ASC LIMIT ?")
                .bind(limit)
                .fetch_all(&mut *tx)
                .await?;

        for record in &records {
            sqlx::query("DELETE FROM Data WHERE id = ?")
                .bind(record.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        if !records.is_empty() {
            debug!(count = records.len(), "Dequeued recovery batch");
        }
        Ok(records)
    }

    /// Whether any record is waiting, without creating the store
    pub async fn exists(&self) -> Result<bool, StorageError> {
        let mut guard = self.pool.lock().await;
        let Some(pool) = self.open_existing(&mut guard).await? else {
            return Ok(false);
        };

        let (found,): (i64,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM Data LIMIT 1)")
            .fetch_one(&pool)
            .await?;
        Ok(found != 0)
    }

    /// Number of waiting records
    pub async fn count(&self) -> Result<u64, StorageError> {
        let mut guard = self.pool.lock().await;
        let Some(pool) = self.open_existing(&mut guard).await? else {
            return Ok(0);
        };

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM Data")
            .fetch_one(&pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Release the database handle; the next operation reopens it
    pub async fn close(&self) {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
    }

    async fn open_existing(
        &self,
        slot: &mut Option<SqlitePool>,
    ) -> Result<Option<SqlitePool>, StorageError> {
        if slot.is_none() && !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        self.open(slot).await.map(Some)
    }

    async fn open(&self, slot: &mut Option<SqlitePool>) -> Result<SqlitePool, StorageError> {
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS Data (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                message TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!(path = %self.path.display(), "Offline queue opened");
        *slot = Some(pool.clone());
        Ok(pool)
    }
}
