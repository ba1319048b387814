//! Time source for the engine and reaper

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::types::truncate_to_millis;

/// Source of "now". Everything that stamps or ages entries reads time here.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, millisecond precision
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        truncate_to_millis(Utc::now())
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(truncate_to_millis(start)),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = truncate_to_millis(to);
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = truncate_to_millis(*now + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
