//! Error types for the NMCK pricing system.

use thiserror::Error;

use crate::types::RequestStatus;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the NMCK pricing system.
///
/// Every failure the core can hit on bad input is one of these values; none of
/// them should take the host process down.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data error (invalid or inconsistent input records).
    #[error("Data error: {0}")]
    Data(String),

    /// No admitted prices to aggregate.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A lifecycle transition that the state machine does not allow.
    #[error("Transition rejected: {from} -> {to}")]
    TransitionRejected {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Another writer holds the store; the operation may be retried.
    #[error("Concurrent write: {0}")]
    ConcurrentWrite(String),

    /// Referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a data error.
    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }

    /// Create an insufficient data error.
    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Error::InsufficientData(msg.into())
    }

    /// Create a rejected-transition error.
    pub fn transition_rejected(from: RequestStatus, to: RequestStatus) -> Self {
        Error::TransitionRejected { from, to }
    }

    /// Create a concurrent write error.
    pub fn concurrent_write(msg: impl Into<String>) -> Self {
        Error::ConcurrentWrite(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Error::Database(msg.into())
    }

    /// Whether this is the "not enough prices" outcome rather than a failure.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Error::InsufficientData(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message() {
        let err = Error::transition_rejected(RequestStatus::Draft, RequestStatus::Approved);
        assert_eq!(err.to_string(), "Transition rejected: draft -> approved");
    }

    #[test]
    fn test_insufficient_data_predicate() {
        assert!(Error::insufficient_data("no prices").is_insufficient_data());
        assert!(!Error::data("bad").is_insufficient_data());
    }
}
