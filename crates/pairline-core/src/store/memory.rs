//! In-memory entry store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::EntryStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{QueueEntry, QueueStats, QueueStatus};

/// Entry store held in process memory.
///
/// Per-entry transitions are compare-and-swaps under the entry's shard lock.
/// The oldest-first scan of `claim_oldest_waiting` is additionally serialised
/// by `claim_lock` so concurrent claimants queue up rather than all racing
/// for the same head entry.
#[derive(Clone, Default)]
pub struct MemoryEntryStore {
    /// Map of user_id to queue entry
    entries: Arc<DashMap<String, QueueEntry>>,
    claim_lock: Arc<Mutex<()>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to the entry if present; returns what `f` returned, or false
    fn update<F>(&self, user_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut QueueEntry) -> bool,
    {
        match self.entries.get_mut(user_id) {
            Some(mut entry) => f(&mut entry),
            None => false,
        }
    }
}

fn set_claiming(entry: &mut QueueEntry, claimant: &str, now: DateTime<Utc>) {
    entry.status = QueueStatus::Claiming;
    entry.claim_holder = Some(claimant.to_string());
    entry.claimed_at = Some(now);
}

fn set_waiting(entry: &mut QueueEntry) {
    entry.status = QueueStatus::Waiting;
    entry.matched_with = None;
    entry.call_id = None;
    entry.claim_holder = None;
    entry.claimed_at = None;
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<QueueEntry>> {
        Ok(self.entries.get(user_id).map(|entry| entry.clone()))
    }

    async fn insert(&self, entry: QueueEntry) -> StoreResult<()> {
        match self.entries.entry(entry.user_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(entry.user_id)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    async fn claim_oldest_waiting(
        &self,
        excluding: &str,
        claimant: &str,
        now: DateTime<Utc>,
        fresh_since: DateTime<Utc>,
    ) -> StoreResult<Option<QueueEntry>> {
        let _scan = self.claim_lock.lock();

        let mut candidates: Vec<(DateTime<Utc>, String)> = self
            .entries
            .iter()
            .filter(|e| {
                e.status == QueueStatus::Waiting && e.user_id != excluding && e.created_at > fresh_since
            })
            .map(|e| (e.created_at, e.user_id.clone()))
            .collect();
        candidates.sort();

        for (_, user_id) in candidates {
            let mut claimed = None;
            self.update(&user_id, |entry| {
                // re-check: a self-lock or delete may have landed since the scan
                if entry.status != QueueStatus::Waiting {
                    return false;
                }
                claimed = Some(entry.clone());
                set_claiming(entry, claimant, now);
                true
            });
            if claimed.is_some() {
                debug!("{} claimed waiting entry {}", claimant, user_id);
                return Ok(claimed);
            }
        }
        Ok(None)
    }

    async fn claim_entry(&self, user_id: &str, claimant: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self.update(user_id, |entry| {
            if entry.status != QueueStatus::Waiting {
                return false;
            }
            set_claiming(entry, claimant, now);
            true
        }))
    }

    async fn commit_match(
        &self,
        user_id: &str,
        claimant: &str,
        partner_id: &str,
        call_id: &str,
    ) -> StoreResult<bool> {
        Ok(self.update(user_id, |entry| {
            if !entry.is_claimed_by(claimant) {
                return false;
            }
            entry.status = QueueStatus::Matched;
            entry.matched_with = Some(partner_id.to_string());
            entry.call_id = Some(call_id.to_string());
            entry.claim_holder = None;
            entry.claimed_at = None;
            true
        }))
    }

    async fn release_claim(&self, user_id: &str, claimant: &str) -> StoreResult<bool> {
        Ok(self.update(user_id, |entry| {
            if !entry.is_claimed_by(claimant) {
                return false;
            }
            set_waiting(entry);
            true
        }))
    }

    async fn revert_match(&self, user_id: &str, call_id: &str) -> StoreResult<bool> {
        Ok(self.update(user_id, |entry| {
            if entry.status != QueueStatus::Matched || entry.call_id.as_deref() != Some(call_id) {
                return false;
            }
            set_waiting(entry);
            true
        }))
    }

    async fn delete(&self, user_id: &str) -> StoreResult<()> {
        match self.entries.remove(user_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(user_id.to_string())),
        }
    }

    async fn delete_if_created_at(&self, user_id: &str, created_at: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self
            .entries
            .remove_if(user_id, |_, entry| entry.created_at == created_at)
            .is_some())
    }

    async fn sweep_expired(&self, max_age: Duration, now: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = now - max_age;
        let mut removed = 0u64;
        self.entries.retain(|_, entry| {
            let keep = entry.created_at > cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn release_stale_claims(&self, claim_timeout: Duration, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut released = 0u64;
        for mut entry in self.entries.iter_mut() {
            if entry.claim_expired(claim_timeout, now) {
                set_waiting(&mut entry);
                released += 1;
            }
        }
        Ok(released)
    }

    async fn stats(&self) -> StoreResult<QueueStats> {
        let mut stats = QueueStats::default();
        for entry in self.entries.iter() {
            match entry.status {
                QueueStatus::Waiting => stats.waiting += 1,
                QueueStatus::Claiming => stats.claiming += 1,
                QueueStatus::Matched => stats.matched += 1,
            }
        }
        Ok(stats)
    }
}
