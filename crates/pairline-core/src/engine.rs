//! # Pairing Engine
//!
//! Join, leave and status-poll on top of an [`EntryStore`]. The engine holds no
//! locks and no authoritative state of its own; every request is an
//! independent unit of work, and the store's conditional writes are the only
//! synchronisation between concurrent requests.
//!
//! ## Entry state machine
//!
//! ```text
//!            join (no partner)            claimed by a joiner / repair
//!  Absent ───────────────────▶ Waiting ─────────────────────────────▶ Claiming
//!    ▲  join (partner found)      ▲                                     │
//!    │ ────────────────────────┐  │ claim timeout / rollback            │ commit
//!    │                         │  └─────────────────────────────────────┤
//!    │ leave / expiry / stale  ▼                                        ▼
//!    └──────────────────── Matched ◀────────────────────────────────────┘
//! ```
//!
//! ## Write ordering
//!
//! A pair is always written "own row first, partner second". While the
//! partner row is still `Claiming` under the caller, the caller's `Matched`
//! row is considered pending rather than stale, so a concurrent poll from the
//! caller never tears the pair down. If the partner commit fails the caller's
//! own row is rolled back, so a half-written pair never survives a request.
//! Anything left behind by a crash mid-sequence is healed by the claim
//! timeout and, ultimately, by the wait window.
//!
//! A `Matched` status is therefore only final once the partner row agrees.
//! A poll that lands between the two writes reports `Matched` with the
//! pending call id; if the partner commit then fails, that call id is
//! withdrawn and the next poll reports the caller's new state (waiting, or a
//! match with a different call id). Clients must not start a call on a call
//! id until both participants have reported it.
//!
//! ## Recovered conditions
//!
//! - *Claim race lost*: the claimed partner vanished or was reclaimed before
//!   the commit. The join retries the claim, then settles as `Waiting`.
//! - *Stale match*: a `Matched` row whose partner no longer corroborates it.
//!   The caller's row is deleted and the join runs again from scratch.
//!
//! Neither is ever returned to the caller. Only store failures propagate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::call_id::{asymmetric_call_id, symmetric_call_id};
use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::{MatchmakingError, Result, StoreError};
use crate::store::EntryStore;
use crate::types::{JoinResponse, LeaveResponse, QueueEntry, QueueStatus, StatusResponse};

/// Pairing protocol over a shared entry store
pub struct PairingEngine {
    store: Arc<dyn EntryStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl PairingEngine {
    pub fn new(store: Arc<dyn EntryStore>, clock: Arc<dyn Clock>, config: QueueConfig) -> Self {
        Self { store, clock, config }
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Ask to be paired.
    ///
    /// Returns the existing state for a user already in the queue, the
    /// existing pair for a user whose match is still corroborated, or the
    /// outcome of a fresh claim attempt.
    pub async fn join(&self, user_id: &str) -> Result<JoinResponse> {
        validate_user_id(user_id)?;

        if let Some(entry) = self.load_own(user_id).await? {
            match entry.status {
                QueueStatus::Matched => {
                    if self.match_holds(&entry).await? {
                        debug!("{} re-joined an intact match", user_id);
                        return Ok(entry.into());
                    }
                    warn!(
                        "Stale match for {} (partner {:?}), re-queueing",
                        user_id, entry.matched_with
                    );
                    self.discard(user_id).await?;
                }
                QueueStatus::Waiting | QueueStatus::Claiming => {
                    debug!("{} already in queue as {}", user_id, entry.status);
                    return Ok(entry.into());
                }
            }
        }

        self.pair_or_enqueue(user_id).await
    }

    /// Leave the queue. Leaving when not queued is not an error.
    pub async fn leave(&self, user_id: &str) -> Result<LeaveResponse> {
        validate_user_id(user_id)?;

        match self.store.delete(user_id).await {
            Ok(()) => info!("{} left the queue", user_id),
            Err(StoreError::NotFound(_)) => debug!("{} left but had no entry", user_id),
            Err(e) => return Err(e.into()),
        }
        Ok(LeaveResponse::LeftQueue)
    }

    /// Report the caller's state, repairing it on the way where possible.
    ///
    /// A waiting caller retries the claim, which pairs up users who joined in
    /// the same instant and both landed in `Waiting`. A matched caller whose
    /// partner disagrees is re-queued. A claim on the caller that has timed
    /// out is released and the caller is treated as waiting.
    pub async fn status(&self, user_id: &str) -> Result<StatusResponse> {
        validate_user_id(user_id)?;

        let Some(entry) = self.load_own(user_id).await? else {
            return Ok(StatusResponse::NotInQueue);
        };

        match entry.status {
            QueueStatus::Matched => {
                if self.match_holds(&entry).await? {
                    return Ok(entry.into());
                }
                warn!(
                    "Stale match for {} (partner {:?}), re-queueing",
                    user_id, entry.matched_with
                );
                self.discard(user_id).await?;
                Ok(self.pair_or_enqueue(user_id).await?.into())
            }
            QueueStatus::Waiting => self.repair(entry).await,
            QueueStatus::Claiming => {
                let now = self.clock.now();
                if !entry.claim_expired(self.config.claim_timeout(), now) {
                    return Ok(entry.into());
                }

                if let Some(holder) = entry.claim_holder.as_deref() {
                    if self.store.release_claim(user_id, holder).await? {
                        warn!("Released timed-out claim by {} on {}", holder, user_id);
                    }
                }
                match self.load_own(user_id).await? {
                    Some(entry) if entry.status == QueueStatus::Waiting => self.repair(entry).await,
                    Some(entry) => Ok(entry.into()),
                    None => Ok(StatusResponse::NotInQueue),
                }
            }
        }
    }

    /// Claim the oldest waiting partner, or enqueue as waiting.
    ///
    /// The caller has no entry when this runs.
    async fn pair_or_enqueue(&self, user_id: &str) -> Result<JoinResponse> {
        for attempt in 1..=self.config.max_claim_attempts {
            let now = self.clock.now();
            let Some(partner) = self
                .store
                .claim_oldest_waiting(user_id, user_id, now, self.fresh_since(now))
                .await?
            else {
                break;
            };

            let call_id = asymmetric_call_id(user_id, now);
            let own = QueueEntry::matched(user_id, &partner.user_id, &call_id, now);

            match self.store.insert(own.clone()).await {
                Ok(()) => {}
                Err(StoreError::Conflict(_)) => {
                    // Another request for the same user got there first
                    self.store.release_claim(&partner.user_id, user_id).await?;
                    return self.adopt_existing(user_id).await;
                }
                Err(e) => {
                    if let Err(release_err) = self.store.release_claim(&partner.user_id, user_id).await {
                        warn!(
                            "Could not release claim on {} after failed insert: {}",
                            partner.user_id, release_err
                        );
                    }
                    return Err(e.into());
                }
            }

            if self
                .store
                .commit_match(&partner.user_id, user_id, user_id, &call_id)
                .await?
            {
                info!("Matched {} with {} (call {})", user_id, partner.user_id, call_id);
                return Ok(JoinResponse::Matched {
                    matched_with: partner.user_id,
                    call_id,
                    queue_entry: own,
                });
            }

            warn!(
                "Claim race lost: {} could not commit {} (attempt {}/{})",
                user_id, partner.user_id, attempt, self.config.max_claim_attempts
            );
            self.discard(user_id).await?;
        }

        let entry = QueueEntry::waiting(user_id, self.clock.now());
        match self.store.insert(entry.clone()).await {
            Ok(()) => {
                debug!("{} is waiting for a partner", user_id);
                Ok(JoinResponse::Waiting { queue_entry: entry })
            }
            Err(StoreError::Conflict(_)) => self.adopt_existing(user_id).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Pair a caller that is already waiting.
    ///
    /// The caller first locks its own entry so that nobody can claim it while
    /// it is claiming someone else. The call id is derived from the pair
    /// alone, so repeating the repair for the same two entries always
    /// produces the same id.
    async fn repair(&self, own: QueueEntry) -> Result<StatusResponse> {
        let user_id = own.user_id.as_str();
        let now = self.clock.now();

        if !self.store.claim_entry(user_id, user_id, now).await? {
            // claimed or removed since we read it
            return self.current_status(user_id).await;
        }

        let partner = match self
            .store
            .claim_oldest_waiting(user_id, user_id, now, self.fresh_since(now))
            .await
        {
            Ok(partner) => partner,
            Err(e) => {
                self.release_quietly(user_id, user_id).await;
                return Err(e.into());
            }
        };

        let Some(partner) = partner else {
            self.store.release_claim(user_id, user_id).await?;
            return self.current_status(user_id).await;
        };

        let call_id = symmetric_call_id(user_id, own.created_at, &partner.user_id, partner.created_at);

        if !self
            .store
            .commit_match(user_id, user_id, &partner.user_id, &call_id)
            .await?
        {
            // our self-lock timed out and was taken over, or we left
            warn!("Repair by {} lost its own lock, releasing {}", user_id, partner.user_id);
            self.store.release_claim(&partner.user_id, user_id).await?;
            return self.current_status(user_id).await;
        }

        if !self
            .store
            .commit_match(&partner.user_id, user_id, user_id, &call_id)
            .await?
        {
            warn!(
                "Claim race lost: repair by {} could not commit {}, rolling back",
                user_id, partner.user_id
            );
            self.store.revert_match(user_id, &call_id).await?;
            return self.current_status(user_id).await;
        }

        info!("Repaired pair {} / {} (call {})", user_id, partner.user_id, call_id);
        Ok(StatusResponse::Matched {
            matched_with: partner.user_id.clone(),
            call_id: call_id.clone(),
            queue_entry: QueueEntry {
                status: QueueStatus::Matched,
                matched_with: Some(partner.user_id),
                call_id: Some(call_id),
                claim_holder: None,
                claimed_at: None,
                ..own
            },
        })
    }

    /// Whether the partner still corroborates a `Matched` entry.
    ///
    /// A partner still `Claiming` under this user is a pair mid-write and
    /// counts as intact until its claim times out.
    async fn match_holds(&self, entry: &QueueEntry) -> Result<bool> {
        let (Some(partner_id), Some(call_id)) = (entry.matched_with.as_deref(), entry.call_id.as_deref())
        else {
            return Ok(false);
        };

        let now = self.clock.now();
        let Some(partner) = self.store.get(partner_id).await? else {
            return Ok(false);
        };
        if partner.is_expired(self.config.wait_window(), now) {
            return Ok(false);
        }

        Ok(partner.is_matched_to(&entry.user_id, call_id)
            || (partner.is_claimed_by(&entry.user_id)
                && !partner.claim_expired(self.config.claim_timeout(), now)))
    }

    /// Fetch the caller's entry, treating one past the wait window as gone
    async fn load_own(&self, user_id: &str) -> Result<Option<QueueEntry>> {
        let Some(entry) = self.store.get(user_id).await? else {
            return Ok(None);
        };
        let window = self.config.wait_window();
        let now = self.clock.now();
        if !entry.is_expired(window, now) {
            return Ok(Some(entry));
        }

        if self.store.delete_if_created_at(user_id, entry.created_at).await? {
            debug!("Entry for {} outlived the wait window", user_id);
            return Ok(None);
        }
        // a concurrent join replaced the expired entry after it was read
        Ok(self
            .store
            .get(user_id)
            .await?
            .filter(|current| !current.is_expired(window, now)))
    }

    async fn current_status(&self, user_id: &str) -> Result<StatusResponse> {
        Ok(match self.load_own(user_id).await? {
            Some(entry) => entry.into(),
            None => StatusResponse::NotInQueue,
        })
    }

    /// Join-shaped view of whatever entry a concurrent request created
    async fn adopt_existing(&self, user_id: &str) -> Result<JoinResponse> {
        match self.store.get(user_id).await? {
            Some(entry) => Ok(entry.into()),
            None => Err(MatchmakingError::internal(format!(
                "entry for {} vanished after an insert conflict",
                user_id
            ))),
        }
    }

    /// Delete the caller's entry; absence is fine
    async fn discard(&self, user_id: &str) -> Result<()> {
        match self.store.delete(user_id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_quietly(&self, user_id: &str, claimant: &str) {
        if let Err(e) = self.store.release_claim(user_id, claimant).await {
            warn!("Could not release claim on {}: {}", user_id, e);
        }
    }

    fn fresh_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.config.wait_window()
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(MatchmakingError::InvalidUserId(user_id.to_string()));
    }
    Ok(())
}
