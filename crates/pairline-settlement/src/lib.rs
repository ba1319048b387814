//! # Pairline Settlement
//!
//! Post-call settlement for paired calls. When the video provider reports a
//! call as ended, participants of long calls earn a star and a user who hangs
//! up almost immediately loses one. Each call is settled at most once, however
//! many end events the provider delivers for it.
//!
//! ```rust
//! use std::sync::Arc;
//! use pairline_core::clock::SystemClock;
//! use pairline_settlement::{CallEndedEvent, MemoryStarLedger, Settlement, SettlementService};
//!
//! # tokio_test::block_on(async {
//! let ledger = MemoryStarLedger::new().with_user("alice", 0).with_user("bob", 0);
//! let service = SettlementService::new(Arc::new(ledger), Arc::new(SystemClock));
//!
//! let event = CallEndedEvent {
//!     event_type: "call.ended".to_string(),
//!     call_id: Some("call-1".to_string()),
//!     duration_secs: 420,
//!     participants: vec!["alice".to_string(), "bob".to_string()],
//!     ended_by: None,
//! };
//! assert!(matches!(service.settle(&event).await?, Settlement::Rewarded { .. }));
//! assert!(matches!(service.settle(&event).await?, Settlement::Duplicate { .. }));
//! # Ok::<(), pairline_settlement::SettlementError>(())
//! # }).unwrap();
//! ```

pub mod cache;
pub mod error;
pub mod policy;
pub mod service;

pub use cache::{ProcessedCallCache, DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL};
pub use error::{Result, SettlementError};
pub use policy::{decide, CallEndedEvent, Decision, PENALTY_MAX_SECS, REWARD_MIN_SECS};
pub use service::{MemoryStarLedger, Settlement, SettlementService, StarLedger};
