//! Lock error types.

use thiserror::Error;

/// Lock error type.
#[derive(Error, Debug)]
pub enum LockError {
    /// At least one resource is held by someone else
    #[error("Resources locked: {resources:?}")]
    Locked { resources: Vec<String> },

    /// Too few lock nodes answered to form a quorum
    #[error("Lock quorum unavailable: {0}")]
    Unavailable(String),

    /// The lease could not be extended and is no longer safe to rely on
    #[error("Lock lease lost: {0}")]
    Lost(String),

    /// `with_lock` was called without resource names
    #[error("No resources to lock")]
    NoResources,

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl LockError {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockError::Locked { .. })
    }
}

/// Result type alias using LockError.
pub type LockResult<T> = Result<T, LockError>;
