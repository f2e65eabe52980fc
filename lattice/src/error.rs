//! Error taxonomy shared by the receipt ledger and the hold coordinator.
//!
//! Timeout and cancellation are terminal resolution kinds, not errors; they
//! never appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LatticeError {
    /// Payload could not be serialized into canonical form.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Malformed input, e.g. empty or out-of-range action probabilities.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resolve named an action label the hold never offered.
    #[error("invalid action '{action}' for hold {hold_id}")]
    InvalidAction { hold_id: String, action: String },

    /// Resolve or cancel targeted a hold id that was never issued.
    #[error("unknown hold {hold_id}")]
    UnknownHold { hold_id: String },

    /// Resolve or cancel targeted a hold that already reached a terminal state.
    #[error("hold {hold_id} already resolved")]
    AlreadyResolved { hold_id: String },

    /// A receipt's recomputed cid or its linkage to the predecessor does not
    /// match the stored record.
    #[error("chain corruption at sequence {sequence}")]
    ChainCorruption { sequence: u64 },

    /// Durable storage failed. The chain head is unchanged and no cid was
    /// handed out for the rejected append.
    #[error("storage error: {0}")]
    Storage(String),
}

pub type LatticeResult<T> = Result<T, LatticeError>;

impl From<serde_json::Error> for LatticeError {
    fn from(err: serde_json::Error) -> Self {
        LatticeError::Encoding(err.to_string())
    }
}

impl From<rusqlite::Error> for LatticeError {
    fn from(err: rusqlite::Error) -> Self {
        LatticeError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for LatticeError {
    fn from(err: std::io::Error) -> Self {
        LatticeError::Storage(err.to_string())
    }
}
