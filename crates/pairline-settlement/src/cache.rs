//! Processed-call deduplication
//!
//! The video provider may deliver the same call-end event more than once,
//! and both `call.ended` and `call.session.ended` fire for one call. The cache
//! remembers which call ids were settled recently so each call is settled at
//! most once within the retention period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pairline_core::clock::Clock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

/// How long a settled call id is remembered
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

/// How often [`ProcessedCallCache::spawn_sweeper`] evicts old ids
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct ProcessedCallCache {
    /// Map of call_id to the time it was settled
    processed: Arc<DashMap<String, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
}

impl ProcessedCallCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_retention(clock, DEFAULT_RETENTION)
    }

    pub fn with_retention(clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            processed: Arc::new(DashMap::new()),
            clock,
            retention: chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::weeks(52)),
        }
    }

    /// Record a call id. Returns false if it was already recorded.
    pub fn mark_processed(&self, call_id: &str) -> bool {
        let now = self.clock.now();
        match self.processed.entry(call_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.processed.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    /// Forget call ids settled longer ago than the retention period
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - self.retention;
        let before = self.processed.len();
        self.processed.retain(|_, settled_at| *settled_at >= cutoff);
        let evicted = before.saturating_sub(self.processed.len());
        if evicted > 0 {
            debug!("Evicted {} processed call ids", evicted);
        }
        evicted
    }

    /// Sweep periodically until the handle is aborted
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pairline_core::clock::ManualClock;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
    }

    #[test]
    fn test_duplicates_detected() {
        let cache = ProcessedCallCache::new(clock());
        assert!(cache.mark_processed("call-1"));
        assert!(!cache.mark_processed("call-1"));
        assert!(cache.mark_processed("call-2"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_sweep_respects_retention() {
        let clock = clock();
        let cache = ProcessedCallCache::new(clock.clone());
        cache.mark_processed("old");
        clock.advance(chrono::Duration::minutes(6));
        cache.mark_processed("recent");

        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(cache.sweep(), 1);
        assert!(!cache.contains("old"));
        assert!(cache.contains("recent"));

        // evicted ids may be settled again
        assert!(cache.mark_processed("old"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_evicts() {
        let clock = clock();
        let cache = ProcessedCallCache::new(clock.clone());
        cache.mark_processed("call-1");
        clock.advance(chrono::Duration::minutes(11));

        let handle = cache.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.is_empty());
        handle.abort();
    }
}
