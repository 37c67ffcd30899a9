//! Idempotency error types.

use thiserror::Error;

/// Idempotency error type.
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// The key was already used with a different request
    #[error("Idempotency key {key} was reused with different request parameters")]
    KeyReused { key: String },

    /// A request with this key is still running
    #[error("A request with idempotency key {key} is already in flight")]
    InFlight { key: String },

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store-level failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl IdempotencyError {
    /// HTTP status the API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            IdempotencyError::KeyReused { .. } => 422,
            IdempotencyError::InFlight { .. } => 409,
            _ => 500,
        }
    }
}

/// Failure of [`crate::IdempotencyCache::handle`]: either the cache refused
/// the request or the handler itself failed.
#[derive(Error, Debug)]
pub enum HandleError<E> {
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    #[error("Handler failed: {0}")]
    Handler(E),
}

/// Result type alias using IdempotencyError.
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;
