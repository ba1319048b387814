//! # Expiry Reaper
//!
//! Background housekeeping for the entry store. Two periodic sweeps run on
//! independent tickers:
//!
//! - the **expiry sweep** deletes every entry older than the wait window,
//!   whatever its status, on the configured sweep interval;
//! - the **claim sweep** reverts claims left uncommitted past the claim
//!   timeout, on a ticker of half the claim timeout, so no claim outlives
//!   its timeout by more than half a timeout.
//!
//! The reaper only bounds lifetimes. Correctness never depends on it running:
//! the pairing engine already treats expired entries as absent and releases
//! timed-out claims it stumbles on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::{QueueConfig, ReaperConfig};
use crate::error::Result;
use crate::store::EntryStore;

/// Outcome of one reaper pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaperReport {
    pub expired: u64,
    pub released_claims: u64,
}

pub struct ExpiryReaper {
    store: Arc<dyn EntryStore>,
    clock: Arc<dyn Clock>,
    wait_window: chrono::Duration,
    claim_timeout: chrono::Duration,
    sweep_interval: Duration,
}

impl ExpiryReaper {
    pub fn new(
        store: Arc<dyn EntryStore>,
        clock: Arc<dyn Clock>,
        queue: &QueueConfig,
        reaper: &ReaperConfig,
    ) -> Self {
        Self {
            store,
            clock,
            wait_window: queue.wait_window(),
            claim_timeout: queue.claim_timeout(),
            sweep_interval: reaper.sweep_interval(),
        }
    }

    /// Run both sweeps once
    pub async fn run_once(&self) -> Result<ReaperReport> {
        Ok(ReaperReport {
            released_claims: self.release_stale_claims().await?,
            expired: self.sweep_expired().await?,
        })
    }

    /// Delete entries that outlived the wait window
    pub async fn sweep_expired(&self) -> Result<u64> {
        let removed = self.store.sweep_expired(self.wait_window, self.clock.now()).await?;
        if removed > 0 {
            info!("🧹 Removed {} expired queue entries", removed);
        }
        Ok(removed)
    }

    /// Revert claims that were never committed
    pub async fn release_stale_claims(&self) -> Result<u64> {
        let released = self
            .store
            .release_stale_claims(self.claim_timeout, self.clock.now())
            .await?;
        if released > 0 {
            info!("🔓 Released {} timed-out claims", released);
        }
        Ok(released)
    }

    /// Interval between claim sweeps
    pub fn claim_sweep_period(&self) -> Duration {
        (self.claim_timeout / 2)
            .to_std()
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_millis(100))
    }

    /// Spawn the periodic loop; abort the handle to stop it
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        info!(
            "Starting expiry reaper (sweep every {:?}, claim timeout {}s)",
            self.sweep_interval,
            self.claim_timeout.num_seconds()
        );

        let mut sweep_ticker = interval(self.sweep_interval);
        let mut claim_ticker = interval(self.claim_sweep_period());
        sweep_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        claim_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sweep_ticker.tick() => {
                    if let Err(e) = self.sweep_expired().await {
                        error!("Expiry sweep failed: {}", e);
                    }
                }
                _ = claim_ticker.tick() => {
                    match self.release_stale_claims().await {
                        Ok(_) => debug!("Claim sweep done"),
                        Err(e) => error!("Claim sweep failed: {}", e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryEntryStore;
    use crate::types::{QueueEntry, QueueStatus};
    use chrono::{TimeZone, Utc};

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn reaper(store: Arc<MemoryEntryStore>, clock: Arc<ManualClock>) -> ExpiryReaper {
        ExpiryReaper::new(store, clock, &QueueConfig::default(), &ReaperConfig::default())
    }

    #[tokio::test]
    async fn test_run_once_reports_both_sweeps() {
        let store = Arc::new(MemoryEntryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));

        store.insert(QueueEntry::waiting("old", t0())).await.unwrap();
        store
            .insert(QueueEntry::matched("old-pair", "x", "c", t0()))
            .await
            .unwrap();
        store
            .insert(QueueEntry::waiting("claimed", t0() + chrono::Duration::minutes(4)))
            .await
            .unwrap();
        assert!(store
            .claim_entry("claimed", "someone", t0() + chrono::Duration::minutes(4))
            .await
            .unwrap());

        clock.set(t0() + chrono::Duration::minutes(5));
        let report = reaper(store.clone(), clock).run_once().await.unwrap();

        assert_eq!(report, ReaperReport { expired: 2, released_claims: 1 });
        let claimed = store.get("claimed").await.unwrap().unwrap();
        assert_eq!(claimed.status, QueueStatus::Waiting);
        assert!(store.get("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_entries_untouched() {
        let store = Arc::new(MemoryEntryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        store.insert(QueueEntry::waiting("alice", t0())).await.unwrap();
        assert!(store.claim_entry("alice", "bob", t0()).await.unwrap());

        clock.advance(chrono::Duration::seconds(5));
        let report = reaper(store.clone(), clock).run_once().await.unwrap();
        assert_eq!(report, ReaperReport::default());
        assert_eq!(store.get("alice").await.unwrap().unwrap().status, QueueStatus::Claiming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_sweeps_and_aborts() {
        let store = Arc::new(MemoryEntryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        store.insert(QueueEntry::waiting("alice", t0())).await.unwrap();
        clock.advance(chrono::Duration::minutes(6));

        let handle = Arc::new(reaper(store.clone(), clock)).spawn();
        // first ticks fire immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get("alice").await.unwrap().is_none());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_claim_sweep_runs_at_half_the_timeout() {
        let store = Arc::new(MemoryEntryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        assert_eq!(reaper(store.clone(), clock.clone()).claim_sweep_period(), Duration::from_secs(5));

        let queue = QueueConfig {
            claim_timeout_secs: 1,
            ..Default::default()
        };
        let short = ExpiryReaper::new(store, clock, &queue, &ReaperConfig::default());
        assert_eq!(short.claim_sweep_period(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_claim_released_within_half_a_timeout() {
        let store = Arc::new(MemoryEntryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        store.insert(QueueEntry::waiting("alice", t0())).await.unwrap();
        assert!(store.claim_entry("alice", "bob", t0()).await.unwrap());

        let handle = Arc::new(reaper(store.clone(), clock.clone())).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("alice").await.unwrap().unwrap().status, QueueStatus::Claiming);

        // timed out just after the first sweep; the next one is half a timeout away
        clock.set(t0() + chrono::Duration::seconds(10));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.get("alice").await.unwrap().unwrap().status, QueueStatus::Waiting);

        handle.abort();
    }
}
