//! Idempotency cache for mutating requests.
//!
//! A request carrying an `Idempotency-Key` header runs its handler at most
//! once per key and request hash within the TTL. Replays get the recorded
//! status and body back with cache-hit headers; a key reused with another
//! payload, or reused while the first request is still running, is rejected.
//!
//! The cache is an explicit value built once at startup and shared with the
//! request handlers. Whether it de-duplicates across instances depends on the
//! store: [`InMemoryIdempotencyStore`] is per process, [`RedisIdempotencyStore`]
//! is shared.

mod cache;
mod error;
mod record;
mod redis_store;
mod store;

#[cfg(test)]
mod tests;

pub use cache::{
    CachedResponse, HandlerResponse, IdempotencyCache, CACHED_AT_HEADER, IDEMPOTENCY_KEY_HEADER,
    REPLAYED_HEADER,
};
pub use error::{HandleError, IdempotencyError, IdempotencyResult};
pub use record::{request_hash, IdempotencyRecord, RecordStatus};
pub use redis_store::RedisIdempotencyStore;
pub use store::{BeginOutcome, IdempotencyStore, InMemoryIdempotencyStore};
