//! Shared fixtures: a cache over the in-memory store and a manual clock.

use crate::{HandlerResponse, IdempotencyCache, InMemoryIdempotencyStore};
use relay_core::ManualClock;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const START_MS: u64 = 1_700_000_000_000;
pub const TTL: Duration = Duration::from_secs(3_600);
pub const PATH: &str = "/trades";
pub const BODY: &[u8] = br#"{"offer_id":42,"quantity":3}"#;

pub struct Fixture {
    pub cache: IdempotencyCache,
    pub store: InMemoryIdempotencyStore,
    pub clock: ManualClock,
    pub calls: Arc<AtomicUsize>,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = ManualClock::new(START_MS);
        let store = InMemoryIdempotencyStore::new(Arc::new(clock.clone()));
        let cache = IdempotencyCache::new(Arc::new(store.clone()), TTL, Arc::new(clock.clone()));
        Self {
            cache,
            store,
            clock,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Handler that counts its invocations and answers with `status`.
pub async fn create_trade(
    calls: Arc<AtomicUsize>,
    status: u16,
) -> Result<HandlerResponse, String> {
    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(HandlerResponse::new(status, json!({ "trade_id": n })))
}

/// Handler that counts its invocations and fails.
pub async fn failing_handler(calls: Arc<AtomicUsize>) -> Result<HandlerResponse, String> {
    calls.fetch_add(1, Ordering::SeqCst);
    Err("database unavailable".to_string())
}
