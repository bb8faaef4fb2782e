//! Store error kinds.

use thiserror::Error;

/// Errors crossing the store boundary.
///
/// `InvalidArgument` is never retried; `Transient` is the retryable kind;
/// `Permanent` means the store (or its protocol) is unusable for this call.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("permanent store failure: {0}")]
    Permanent(String),
}

impl PersistenceError {
    /// Default retry classification. Callers may override (the order
    /// completion pipeline retries every kind).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Conflict(_))
    }
}

impl From<scylla::transport::errors::QueryError> for PersistenceError {
    fn from(err: scylla::transport::errors::QueryError) -> Self {
        PersistenceError::Transient(err.to_string())
    }
}

impl From<scylla::transport::errors::NewSessionError> for PersistenceError {
    fn from(err: scylla::transport::errors::NewSessionError) -> Self {
        PersistenceError::Permanent(err.to_string())
    }
}
