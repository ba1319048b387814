//! Applying settlement decisions to user star balances

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use pairline_core::clock::Clock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::ProcessedCallCache;
use crate::error::{Result, SettlementError};
use crate::policy::{decide, CallEndedEvent, Decision};

/// Persistent star balances, owned by the user service
#[async_trait]
pub trait StarLedger: Send + Sync {
    /// Current balance, or None for an unknown user
    async fn balance(&self, user_id: &str) -> Result<Option<u64>>;

    /// Add `delta` stars, clamping at zero. Returns the new balance, or None
    /// for an unknown user.
    async fn adjust(&self, user_id: &str, delta: i64) -> Result<Option<u64>>;
}

/// Outcome of settling one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Settlement {
    Ignored { event_type: String },
    Duplicate { call_id: String },
    Rewarded { call_id: String, rewarded: Vec<(String, u64)> },
    Penalized { call_id: String, user_id: String, new_balance: u64 },
    NoAction { call_id: String },
}

pub struct SettlementService {
    cache: ProcessedCallCache,
    ledger: Arc<dyn StarLedger>,
}

impl SettlementService {
    pub fn new(ledger: Arc<dyn StarLedger>, clock: Arc<dyn Clock>) -> Self {
        Self::with_cache(ledger, ProcessedCallCache::new(clock))
    }

    pub fn with_cache(ledger: Arc<dyn StarLedger>, cache: ProcessedCallCache) -> Self {
        Self { cache, ledger }
    }

    pub fn cache(&self) -> &ProcessedCallCache {
        &self.cache
    }

    /// Settle a call-end event at most once per call id
    pub async fn settle(&self, event: &CallEndedEvent) -> Result<Settlement> {
        if !event.is_call_end() {
            debug!("Ignoring event type {}", event.event_type);
            return Ok(Settlement::Ignored {
                event_type: event.event_type.clone(),
            });
        }

        let call_id = event
            .call_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(SettlementError::MissingCallId)?;

        if !self.cache.mark_processed(&call_id) {
            info!("Call {} already settled, skipping duplicate", call_id);
            return Ok(Settlement::Duplicate { call_id });
        }

        info!("Settling call {} ({}s)", call_id, event.duration_secs);

        match decide(event) {
            Decision::Ignore | Decision::NoAction => Ok(Settlement::NoAction { call_id }),
            Decision::Reward { participants } => {
                let mut rewarded = Vec::with_capacity(participants.len());
                for user_id in participants {
                    match self.ledger.adjust(&user_id, 1).await? {
                        Some(balance) => {
                            info!("Rewarded {} for call {}, balance {}", user_id, call_id, balance);
                            rewarded.push((user_id, balance));
                        }
                        None => warn!("Reward skipped for unknown user {}", user_id),
                    }
                }
                if rewarded.is_empty() {
                    return Ok(Settlement::NoAction { call_id });
                }
                Ok(Settlement::Rewarded { call_id, rewarded })
            }
            Decision::Penalty { user_id } => {
                match self.ledger.balance(&user_id).await? {
                    Some(stars) if stars > 0 => {}
                    Some(_) => {
                        debug!("{} has no stars to deduct", user_id);
                        return Ok(Settlement::NoAction { call_id });
                    }
                    None => {
                        warn!("Penalty skipped for unknown user {}", user_id);
                        return Ok(Settlement::NoAction { call_id });
                    }
                }
                match self.ledger.adjust(&user_id, -1).await? {
                    Some(new_balance) => {
                        info!("Penalized {} for ending call {} early, balance {}", user_id, call_id, new_balance);
                        Ok(Settlement::Penalized {
                            call_id,
                            user_id,
                            new_balance,
                        })
                    }
                    None => Ok(Settlement::NoAction { call_id }),
                }
            }
        }
    }
}

/// In-process ledger, for tests and single-node deployments
#[derive(Debug, Clone, Default)]
pub struct MemoryStarLedger {
    balances: Arc<DashMap<String, u64>>,
}

impl MemoryStarLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with a starting balance
    pub fn with_user(self, user_id: &str, stars: u64) -> Self {
        self.balances.insert(user_id.to_string(), stars);
        self
    }
}

#[async_trait]
impl StarLedger for MemoryStarLedger {
    async fn balance(&self, user_id: &str) -> Result<Option<u64>> {
        Ok(self.balances.get(user_id).map(|stars| *stars))
    }

    async fn adjust(&self, user_id: &str, delta: i64) -> Result<Option<u64>> {
        Ok(self.balances.get_mut(user_id).map(|mut stars| {
            *stars = if delta >= 0 {
                stars.saturating_add(delta.unsigned_abs())
            } else {
                stars.saturating_sub(delta.unsigned_abs())
            };
            *stars
        }))
    }
}
