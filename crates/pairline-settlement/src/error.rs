use thiserror::Error;

/// Settlement errors
#[derive(Error, Debug)]
pub enum SettlementError {
    /// A call-end event carried no call id to deduplicate on
    #[error("Call-end event has no call id")]
    MissingCallId,

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// The star ledger rejected or failed an adjustment
    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl From<serde_json::Error> for SettlementError {
    fn from(err: serde_json::Error) -> Self {
        SettlementError::MalformedEvent(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
