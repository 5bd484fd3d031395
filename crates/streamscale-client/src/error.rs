//! Collaborator error types.

use thiserror::Error;

/// Result type alias for collaborator calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors reported by a stream-management, metrics, or notification client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource in use: {0}")]
    ResourceInUse(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,
}
