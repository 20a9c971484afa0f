//! Coordination store errors.
//!
//! Two kinds of failure come out of the store: the backend itself could
//! not be reached or used, or a value stored under an `/autoscaling/...`
//! path could not be decoded. Only the first kind means the store is down.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open coordination store: {0}")]
    Open(String),

    #[error("coordination store transaction failed: {0}")]
    Transaction(String),

    #[error("coordination table unavailable: {0}")]
    Table(String),

    #[error("failed to read coordination path: {0}")]
    Read(String),

    #[error("failed to write coordination path: {0}")]
    Write(String),

    /// A lock lease could not be encoded.
    #[error("failed to encode lease: {0}")]
    Serialize(String),

    /// A stored lock lease could not be decoded.
    #[error("failed to decode lease: {0}")]
    Deserialize(String),

    /// A path holds a value its reader can't parse, e.g. a non-integer
    /// instance count.
    #[error("malformed value at {path}: {value:?}")]
    Malformed { path: String, value: String },
}

impl StateError {
    /// Whether the store backend failed, as opposed to one bad value.
    pub fn is_unreachable(&self) -> bool {
        !matches!(
            self,
            StateError::Malformed { .. } | StateError::Serialize(_) | StateError::Deserialize(_)
        )
    }
}
