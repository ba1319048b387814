//! # Entry Store
//!
//! Persistent table of queue entries keyed by user id. The store is the only
//! shared mutable resource in the system and the only place where requests
//! from different processes synchronise.
//!
//! ## Atomicity contract
//!
//! - [`EntryStore::claim_oldest_waiting`] is linearizable: two concurrent
//!   claimants racing for the same waiting entry never both succeed.
//! - [`EntryStore::insert`] is atomic with respect to concurrent inserts for
//!   the same user (one-entry-per-user is enforced here, not by the engine).
//! - Every conditional write (`claim_entry`, `commit_match`, `release_claim`,
//!   `revert_match`) is a compare-and-swap on a single entry and reports
//!   whether it applied. A conditional write against a missing entry never
//!   recreates it.
//!
//! Two backends ship with the crate: [`MemoryEntryStore`] for single-process
//! deployments and tests, and [`SqliteEntryStore`] backed by sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StoreResult;
use crate::types::{QueueEntry, QueueStats};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryEntryStore;
pub use sqlite::SqliteEntryStore;

#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Point lookup by owner
    async fn get(&self, user_id: &str) -> StoreResult<Option<QueueEntry>>;

    /// Insert a new entry; `StoreError::Conflict` if the user already has one
    async fn insert(&self, entry: QueueEntry) -> StoreResult<()>;

    /// Atomically move the oldest `Waiting` entry not owned by `excluding` and
    /// created after `fresh_since` to `Claiming` under `claimant`.
    ///
    /// Returns the entry as it was before the update, or `None` when nothing
    /// is eligible.
    async fn claim_oldest_waiting(
        &self,
        excluding: &str,
        claimant: &str,
        now: DateTime<Utc>,
        fresh_since: DateTime<Utc>,
    ) -> StoreResult<Option<QueueEntry>>;

    /// `Waiting` → `Claiming` under `claimant` for one named entry
    async fn claim_entry(&self, user_id: &str, claimant: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    /// `Claiming` (held by `claimant`) → `Matched` with `partner_id`/`call_id`.
    /// Fails without side effects if the entry is gone or held by someone else.
    async fn commit_match(
        &self,
        user_id: &str,
        claimant: &str,
        partner_id: &str,
        call_id: &str,
    ) -> StoreResult<bool>;

    /// `Claiming` (held by `claimant`) → `Waiting`
    async fn release_claim(&self, user_id: &str, claimant: &str) -> StoreResult<bool>;

    /// `Matched` on `call_id` → `Waiting`; rolls back one side of a half-made pair
    async fn revert_match(&self, user_id: &str, call_id: &str) -> StoreResult<bool>;

    /// Remove the entry; `StoreError::NotFound` if there was none
    async fn delete(&self, user_id: &str) -> StoreResult<()>;

    /// Remove the entry only if it is still the one created at `created_at`;
    /// a newer entry for the same user is left alone
    async fn delete_if_created_at(&self, user_id: &str, created_at: DateTime<Utc>) -> StoreResult<bool>;

    /// Remove every entry, whatever its status, created at or before `now - max_age`
    async fn sweep_expired(&self, max_age: Duration, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Revert `Claiming` entries whose claim is at least `claim_timeout` old
    async fn release_stale_claims(&self, claim_timeout: Duration, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Entry counts by status
    async fn stats(&self) -> StoreResult<QueueStats>;
}
