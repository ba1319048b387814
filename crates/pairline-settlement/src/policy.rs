//! Reward and penalty rules for finished calls

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SettlementError};

/// Calls at least this long reward every participant
pub const REWARD_MIN_SECS: u64 = 300;

/// Calls shorter than this penalise whoever hung up
pub const PENALTY_MAX_SECS: u64 = 60;

/// Event types that mean a call is over
pub const CALL_END_EVENTS: [&str; 2] = ["call.ended", "call.session.ended"];

/// A call-end notification from the video provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallEndedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub call_id: Option<String>,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default)]
    pub participants: Vec<String>,
    /// User who ended the call, if the provider reported one
    pub ended_by: Option<String>,
}

impl CallEndedEvent {
    pub fn is_call_end(&self) -> bool {
        CALL_END_EVENTS.contains(&self.event_type.as_str())
    }

    /// Build an event from the provider's raw webhook body.
    ///
    /// The provider nests the call under `call` and the acting user under
    /// `user`. The call id is `call.id`, falling back to `call.cid`.
    /// Participants come from `call.session.participants`, falling back to
    /// `call.members`, each identified by `user_id` or `user.id`.
    pub fn from_webhook(body: &Value) -> Result<Self> {
        let event_type = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SettlementError::MalformedEvent("missing event type".to_string()))?
            .to_string();

        let call = body.get("call");
        let call_id = call
            .and_then(|c| c.get("id").or_else(|| c.get("cid")))
            .and_then(Value::as_str)
            .map(str::to_string);

        let duration_secs = call
            .and_then(|c| c.get("duration"))
            .and_then(|d| d.as_u64().or_else(|| d.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(0);

        let members = call
            .and_then(|c| c.pointer("/session/participants"))
            .or_else(|| call.and_then(|c| c.get("members")))
            .and_then(Value::as_array);
        let participants = members
            .map(|list| {
                list.iter()
                    .filter_map(|p| {
                        p.get("user_id")
                            .or_else(|| p.pointer("/user/id"))
                            .and_then(Value::as_str)
                    })
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let ended_by = body
            .pointer("/user/id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(Self {
            event_type,
            call_id,
            duration_secs,
            participants,
            ended_by,
        })
    }
}

/// What a finished call earns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not a call-end event
    Ignore,
    Reward { participants: Vec<String> },
    Penalty { user_id: String },
    NoAction,
}

/// Apply the duration rules to an event
pub fn decide(event: &CallEndedEvent) -> Decision {
    if !event.is_call_end() {
        return Decision::Ignore;
    }
    if event.duration_secs >= REWARD_MIN_SECS && !event.participants.is_empty() {
        return Decision::Reward {
            participants: event.participants.clone(),
        };
    }
    if event.duration_secs < PENALTY_MAX_SECS {
        if let Some(user_id) = &event.ended_by {
            return Decision::Penalty {
                user_id: user_id.clone(),
            };
        }
    }
    Decision::NoAction
}
