//! Lease error types.

use thiserror::Error;

/// Lease store error type.
#[derive(Error, Debug)]
pub enum LeaseError {
    /// Redis connection or script error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backing store could not be reached
    #[error("Lease store unavailable: {0}")]
    Unavailable(String),

    /// The store returned something that is not a lease
    #[error("Malformed lease record: {0}")]
    Malformed(String),
}

/// Result type alias using LeaseError.
pub type LeaseResult<T> = Result<T, LeaseError>;
