//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored entry is not a valid envelope
    #[error("Corrupt outbox entry: {0}")]
    Corrupt(String),

    /// The outbox store rejected or could not run an operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// The broker refused the connection or returned an error status
    #[error("Broker error: {0}")]
    Broker(String),

    /// No acknowledgment arrived within the publish timeout
    #[error("Publish timed out after {0} ms")]
    Timeout(u64),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
