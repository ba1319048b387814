//! Core types for pairline-core

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queue entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Claiming,
    Matched,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Claiming => "claiming",
            QueueStatus::Matched => "matched",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(QueueStatus::Waiting),
            "claiming" => Some(QueueStatus::Claiming),
            "matched" => Some(QueueStatus::Matched),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's record of call-seeking intent.
///
/// `matched_with` and `call_id` are set exactly when `status` is `Matched`;
/// `claim_holder` and `claimed_at` exactly when it is `Claiming`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntry {
    pub user_id: String,
    pub status: QueueStatus,
    pub matched_with: Option<String>,
    pub call_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claim_holder: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// New entry waiting for a partner
    pub fn waiting(user_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            status: QueueStatus::Waiting,
            matched_with: None,
            call_id: None,
            created_at: truncate_to_millis(created_at),
            claim_holder: None,
            claimed_at: None,
        }
    }

    /// New entry that is born already paired
    pub fn matched(
        user_id: impl Into<String>,
        partner_id: impl Into<String>,
        call_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            status: QueueStatus::Matched,
            matched_with: Some(partner_id.into()),
            call_id: Some(call_id.into()),
            created_at: truncate_to_millis(created_at),
            claim_holder: None,
            claimed_at: None,
        }
    }

    /// True once the entry has outlived the wait window
    pub fn is_expired(&self, wait_window: Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at >= wait_window
    }

    /// True when the entry is `Claiming` and the claim has run past `claim_timeout`.
    /// A claim without a timestamp counts as expired.
    pub fn claim_expired(&self, claim_timeout: Duration, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Claiming
            && self.claimed_at.map_or(true, |at| now - at >= claim_timeout)
    }

    /// Whether this entry is the matched counterpart of `user_id` on `call_id`
    pub fn is_matched_to(&self, user_id: &str, call_id: &str) -> bool {
        self.status == QueueStatus::Matched
            && self.matched_with.as_deref() == Some(user_id)
            && self.call_id.as_deref() == Some(call_id)
    }

    /// Whether this entry is currently held by `claimant`
    pub fn is_claimed_by(&self, claimant: &str) -> bool {
        self.status == QueueStatus::Claiming && self.claim_holder.as_deref() == Some(claimant)
    }
}

/// Drop sub-millisecond precision so timestamps survive a round trip
/// through any backend unchanged.
pub fn truncate_to_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

/// Result of a join request
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinResponse {
    Waiting {
        queue_entry: QueueEntry,
    },
    Matched {
        matched_with: String,
        call_id: String,
        queue_entry: QueueEntry,
    },
}

impl JoinResponse {
    pub fn entry(&self) -> &QueueEntry {
        match self {
            JoinResponse::Waiting { queue_entry } => queue_entry,
            JoinResponse::Matched { queue_entry, .. } => queue_entry,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            JoinResponse::Matched { call_id, .. } => Some(call_id),
            JoinResponse::Waiting { .. } => None,
        }
    }

    pub fn matched_with(&self) -> Option<&str> {
        match self {
            JoinResponse::Matched { matched_with, .. } => Some(matched_with),
            JoinResponse::Waiting { .. } => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, JoinResponse::Matched { .. })
    }
}

impl From<QueueEntry> for JoinResponse {
    /// Claiming entries are reported as waiting from the owner's point of view.
    fn from(entry: QueueEntry) -> Self {
        match (entry.status, entry.matched_with.clone(), entry.call_id.clone()) {
            (QueueStatus::Matched, Some(matched_with), Some(call_id)) => JoinResponse::Matched {
                matched_with,
                call_id,
                queue_entry: entry,
            },
            _ => JoinResponse::Waiting { queue_entry: entry },
        }
    }
}

/// Result of a leave request
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LeaveResponse {
    LeftQueue,
}

/// Result of a status poll
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusResponse {
    NotInQueue,
    Waiting {
        queue_entry: QueueEntry,
    },
    Claiming {
        queue_entry: QueueEntry,
    },
    Matched {
        matched_with: String,
        call_id: String,
        queue_entry: QueueEntry,
    },
}

impl StatusResponse {
    pub fn status(&self) -> Option<QueueStatus> {
        match self {
            StatusResponse::NotInQueue => None,
            StatusResponse::Waiting { .. } => Some(QueueStatus::Waiting),
            StatusResponse::Claiming { .. } => Some(QueueStatus::Claiming),
            StatusResponse::Matched { .. } => Some(QueueStatus::Matched),
        }
    }

    pub fn entry(&self) -> Option<&QueueEntry> {
        match self {
            StatusResponse::NotInQueue => None,
            StatusResponse::Waiting { queue_entry }
            | StatusResponse::Claiming { queue_entry }
            | StatusResponse::Matched { queue_entry, .. } => Some(queue_entry),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            StatusResponse::Matched { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    pub fn matched_with(&self) -> Option<&str> {
        match self {
            StatusResponse::Matched { matched_with, .. } => Some(matched_with),
            _ => None,
        }
    }
}

impl From<QueueEntry> for StatusResponse {
    fn from(entry: QueueEntry) -> Self {
        match (entry.status, entry.matched_with.clone(), entry.call_id.clone()) {
            (QueueStatus::Matched, Some(matched_with), Some(call_id)) => StatusResponse::Matched {
                matched_with,
                call_id,
                queue_entry: entry,
            },
            (QueueStatus::Claiming, _, _) => StatusResponse::Claiming { queue_entry: entry },
            _ => StatusResponse::Waiting { queue_entry: entry },
        }
    }
}

impl From<JoinResponse> for StatusResponse {
    fn from(response: JoinResponse) -> Self {
        match response {
            JoinResponse::Waiting { queue_entry } => StatusResponse::Waiting { queue_entry },
            JoinResponse::Matched {
                matched_with,
                call_id,
                queue_entry,
            } => StatusResponse::Matched {
                matched_with,
                call_id,
                queue_entry,
            },
        }
    }
}

/// Entry counts by status
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: u64,
    pub claiming: u64,
    pub matched: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.waiting + self.claiming + self.matched
    }
}
