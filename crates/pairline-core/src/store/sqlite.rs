//! # SQLite entry store (sqlx)
//!
//! Durable backend for multi-process deployments sharing one database file.
//! The claim is one `UPDATE ... RETURNING` statement; SQLite holds the write
//! lock for the whole statement, so the oldest-waiting subquery and the
//! status check that guards the update see the same snapshot.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use super::EntryStore;
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::types::{QueueEntry, QueueStats, QueueStatus};

const ENTRY_COLUMNS: &str =
    "user_id, status, matched_with, call_id, created_at, claim_holder, claimed_at";

/// Entry store backed by a SQLite database
#[derive(Clone)]
pub struct SqliteEntryStore {
    pool: SqlitePool,
}

impl SqliteEntryStore {
    /// Connect with default pool settings and run migrations
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::connect(&DatabaseConfig {
            url: database_url.to_string(),
            ..Default::default()
        })
        .await
    }

    /// Create an in-memory database for testing
    pub async fn new_in_memory() -> StoreResult<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Connect using `config` and run migrations
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        info!("Initializing SQLite entry store: {}", config.url);

        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .busy_timeout(config.busy_timeout())
            .create_if_missing(true);

        // Every connection to `:memory:` opens its own private database, so an
        // in-memory store must live on exactly one connection that never recycles.
        let pool_options = if config.is_in_memory() {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>)
        } else {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("SQLite entry store ready");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn entry_from_row(row: &SqliteRow) -> StoreResult<QueueEntry> {
        let status: String = row.try_get("status")?;
        let status = QueueStatus::from_str(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status {:?}", status)))?;

        Ok(QueueEntry {
            user_id: row.try_get("user_id")?,
            status,
            matched_with: row.try_get("matched_with")?,
            call_id: row.try_get("call_id")?,
            created_at: from_millis(row.try_get("created_at")?)?,
            claim_holder: row.try_get("claim_holder")?,
            claimed_at: row
                .try_get::<Option<i64>, _>("claimed_at")?
                .map(from_millis)
                .transpose()?,
        })
    }
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<QueueEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM queue_entries WHERE user_id = ?",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn insert(&self, entry: QueueEntry) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO queue_entries (user_id, status, matched_with, call_id, created_at, claim_holder, claimed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.user_id)
        .bind(entry.status.as_str())
        .bind(&entry.matched_with)
        .bind(&entry.call_id)
        .bind(entry.created_at.timestamp_millis())
        .bind(&entry.claim_holder)
        .bind(entry.claimed_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Conflict(entry.user_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_oldest_waiting(
        &self,
        excluding: &str,
        claimant: &str,
        now: DateTime<Utc>,
        fresh_since: DateTime<Utc>,
    ) -> StoreResult<Option<QueueEntry>> {
        let row = sqlx::query(&format!(
            "UPDATE queue_entries
             SET status = 'claiming', claim_holder = ?, claimed_at = ?
             WHERE status = 'waiting'
               AND user_id = (
                   SELECT user_id FROM queue_entries
                   WHERE status = 'waiting' AND user_id != ? AND created_at > ?
                   ORDER BY created_at ASC, user_id ASC
                   LIMIT 1
               )
             RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(claimant)
        .bind(now.timestamp_millis())
        .bind(excluding)
        .bind(fresh_since.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        // RETURNING yields the post-update row; hand back the waiting snapshot
        let mut entry = Self::entry_from_row(&row)?;
        entry.status = QueueStatus::Waiting;
        entry.claim_holder = None;
        entry.claimed_at = None;

        debug!("{} claimed waiting entry {}", claimant, entry.user_id);
        Ok(Some(entry))
    }

    async fn claim_entry(&self, user_id: &str, claimant: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE queue_entries SET status = 'claiming', claim_holder = ?, claimed_at = ?
             WHERE user_id = ? AND status = 'waiting'",
        )
        .bind(claimant)
        .bind(now.timestamp_millis())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit_match(
        &self,
        user_id: &str,
        claimant: &str,
        partner_id: &str,
        call_id: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE queue_entries
             SET status = 'matched', matched_with = ?, call_id = ?, claim_holder = NULL, claimed_at = NULL
             WHERE user_id = ? AND status = 'claiming' AND claim_holder = ?",
        )
        .bind(partner_id)
        .bind(call_id)
        .bind(user_id)
        .bind(claimant)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_claim(&self, user_id: &str, claimant: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE queue_entries SET status = 'waiting', claim_holder = NULL, claimed_at = NULL
             WHERE user_id = ? AND status = 'claiming' AND claim_holder = ?",
        )
        .bind(user_id)
        .bind(claimant)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revert_match(&self, user_id: &str, call_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE queue_entries SET status = 'waiting', matched_with = NULL, call_id = NULL
             WHERE user_id = ? AND status = 'matched' AND call_id = ?",
        )
        .bind(user_id)
        .bind(call_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, user_id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn delete_if_created_at(&self, user_id: &str, created_at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE user_id = ? AND created_at = ?")
            .bind(user_id)
            .bind(created_at.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn sweep_expired(&self, max_age: Duration, now: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = now - max_age;
        let result = sqlx::query("DELETE FROM queue_entries WHERE created_at <= ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn release_stale_claims(&self, claim_timeout: Duration, now: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = now - claim_timeout;
        let result = sqlx::query(
            "UPDATE queue_entries SET status = 'waiting', claim_holder = NULL, claimed_at = NULL
             WHERE status = 'claiming' AND claimed_at <= ?",
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> StoreResult<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'waiting' THEN 1 ELSE 0 END), 0) AS waiting,
                COALESCE(SUM(CASE WHEN status = 'claiming' THEN 1 ELSE 0 END), 0) AS claiming,
                COALESCE(SUM(CASE WHEN status = 'matched' THEN 1 ELSE 0 END), 0) AS matched
             FROM queue_entries",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            waiting: row.try_get::<i64, _>("waiting")? as u64,
            claiming: row.try_get::<i64, _>("claiming")? as u64,
            matched: row.try_get::<i64, _>("matched")? as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn memory_store() -> SqliteEntryStore {
        SqliteEntryStore::new_in_memory().await.unwrap()
    }

    /// On-disk database with a real multi-connection pool
    async fn file_store() -> (SqliteEntryStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");
        let store = SqliteEntryStore::connect(&DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", db_path.display()),
            max_connections: 8,
            ..Default::default()
        })
        .await
        .expect("Failed to create test database");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        conformance::insert_get_delete(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_claim_picks_oldest_and_skips_self() {
        conformance::claim_picks_oldest_and_skips_self(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_claim_skips_expired() {
        conformance::claim_skips_expired(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_commit_requires_matching_claim() {
        conformance::commit_requires_matching_claim(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_commit_never_resurrects() {
        conformance::commit_never_resurrects(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_release_and_revert() {
        conformance::release_and_revert(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_sweep_removes_any_status() {
        conformance::sweep_removes_any_status(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_stale_claims_are_released() {
        conformance::stale_claims_are_released(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_conditional_delete_spares_newer_entry() {
        conformance::conditional_delete_spares_newer_entry(&memory_store().await).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_one_winner() {
        let (store, _temp_dir) = file_store().await;
        conformance::concurrent_claims_have_one_winner(Arc::new(store)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_have_one_winner() {
        let (store, _temp_dir) = file_store().await;
        conformance::concurrent_inserts_have_one_winner(Arc::new(store)).await;
    }

    #[tokio::test]
    async fn test_schema_rejects_matched_without_partner() {
        let store = memory_store().await;
        let mut entry = QueueEntry::waiting("alice", conformance::t0());
        entry.status = QueueStatus::Matched;

        let err = store.insert(entry).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_) | StoreError::Corrupt(_)));
        assert!(store.get("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_status_is_corrupt() {
        let store = memory_store().await;
        store.insert(QueueEntry::waiting("alice", conformance::t0())).await.unwrap();

        // bypass the CHECK constraint to simulate a foreign writer
        sqlx::query("PRAGMA ignore_check_constraints = ON").execute(store.pool()).await.unwrap();
        sqlx::query("UPDATE queue_entries SET status = 'limbo' WHERE user_id = 'alice'")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(matches!(store.get("alice").await, Err(StoreError::Corrupt(_))));
    }
}
