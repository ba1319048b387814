//! Error types for the pairing core
//!
//! Only store-level unavailability ever reaches callers of the engine. Claim
//! races and stale matches are recovered inside the engine and never show up
//! here.

use thiserror::Error;

/// Errors raised by an [`EntryStore`](crate::store::EntryStore) backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// Insert would give a user a second live entry
    #[error("Entry already exists for user {0}")]
    Conflict(String),

    /// The entry no longer exists (left, expired, or never created)
    #[error("No entry for user {0}")]
    NotFound(String),

    /// Transport, pool or database failure; safe to retry
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A persisted record could not be decoded
    #[error("Corrupt entry: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(err.to_string())
            }
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StoreError::Corrupt(err.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unavailable(format!("Failed to run migrations: {}", err))
    }
}

/// Errors surfaced by the pairing engine and server
#[derive(Error, Debug)]
pub enum MatchmakingError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MatchmakingError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        MatchmakingError::Configuration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        MatchmakingError::Internal(msg.into())
    }

    /// Whether the caller may simply retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatchmakingError::Store(StoreError::Unavailable(_)))
    }
}

impl From<config::ConfigError> for MatchmakingError {
    fn from(err: config::ConfigError) -> Self {
        MatchmakingError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MatchmakingError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailability_is_retryable() {
        assert!(MatchmakingError::from(StoreError::Unavailable("pool timed out".into())).is_retryable());
        assert!(!MatchmakingError::from(StoreError::Conflict("alice".into())).is_retryable());
        assert!(!MatchmakingError::configuration("bad").is_retryable());
        assert!(!MatchmakingError::InvalidUserId(String::new()).is_retryable());
    }

    #[test]
    fn test_sqlx_pool_errors_map_to_unavailable() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Unavailable(_)));

        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
