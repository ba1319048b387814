//! # Pairline Core
//!
//! Anonymous one-on-one call pairing. Users join a shared queue; the engine
//! pairs each joiner with the oldest compatible waiting user and hands both
//! sides the same call identifier. Pairing is safe under any number of
//! concurrent joins, polls and leaves across any number of server instances
//! sharing one entry store.
//!
//! ## Components
//!
//! - [`store`]: the [`EntryStore`] trait with its conditional writes, plus an
//!   in-memory and a SQLite backend
//! - [`engine`]: the [`PairingEngine`] implementing join, leave and status
//! - [`call_id`]: call identifier generation
//! - [`reaper`]: periodic expiry of stale entries and abandoned claims
//! - [`server`]: lifecycle wiring of the above
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use pairline_core::prelude::*;
//!
//! # async fn example() -> pairline_core::Result<()> {
//! let engine = PairingEngine::new(
//!     Arc::new(MemoryEntryStore::new()),
//!     Arc::new(SystemClock),
//!     QueueConfig::default(),
//! );
//!
//! engine.join("alice").await?;
//! let bob = engine.join("bob").await?;
//! assert_eq!(bob.matched_with(), Some("alice"));
//!
//! let alice = engine.status("alice").await?;
//! assert_eq!(alice.call_id(), bob.call_id());
//! # Ok(())
//! # }
//! ```

pub mod call_id;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod reaper;
pub mod server;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DatabaseConfig, MatchmakingConfig, QueueConfig, ReaperConfig, MAX_DURATION_SECS};
pub use engine::PairingEngine;
pub use error::{MatchmakingError, Result, StoreError, StoreResult};
pub use reaper::{ExpiryReaper, ReaperReport};
pub use server::{MatchmakingServer, MatchmakingServerBuilder};
pub use store::{EntryStore, MemoryEntryStore, SqliteEntryStore};
pub use types::{JoinResponse, LeaveResponse, QueueEntry, QueueStats, QueueStatus, StatusResponse};

/// Common imports for users of the crate
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::{MatchmakingConfig, QueueConfig};
    pub use crate::engine::PairingEngine;
    pub use crate::error::{MatchmakingError, Result};
    pub use crate::server::{MatchmakingServer, MatchmakingServerBuilder};
    pub use crate::store::{EntryStore, MemoryEntryStore, SqliteEntryStore};
    pub use crate::types::{JoinResponse, LeaveResponse, QueueEntry, QueueStatus, StatusResponse};
}
