//! Request-level idempotency wrapper.

use crate::{
    request_hash, BeginOutcome, HandleError, IdempotencyError, IdempotencyRecord,
    IdempotencyResult, IdempotencyStore, RecordStatus,
};
use chrono::{DateTime, SecondsFormat, Utc};
use relay_core::{RelayConfig, SharedClock};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Request header carrying the client-chosen key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
/// Response header set on replays.
pub const REPLAYED_HEADER: &str = "Idempotent-Replayed";
/// Response header with the RFC 3339 time the replayed response was recorded.
pub const CACHED_AT_HEADER: &str = "X-Idempotency-Cached-At";

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

impl HandlerResponse {
    pub fn new(status_code: u16, body: serde_json::Value) -> Self {
        Self { status_code, body }
    }
}

/// Response returned to the caller, fresh or replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
    pub cache_hit: bool,
    /// When the replayed response was first recorded.
    pub cached_at_ms: Option<u64>,
}

impl CachedResponse {
    fn fresh(response: HandlerResponse) -> Self {
        Self {
            status_code: response.status_code,
            body: response.body,
            cache_hit: false,
            cached_at_ms: None,
        }
    }

    /// Extra headers for the HTTP response. Empty unless this is a replay.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        if !self.cache_hit {
            return Vec::new();
        }
        let mut headers = vec![(REPLAYED_HEADER, "true".to_string())];
        let cached_at = self
            .cached_at_ms
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64));
        if let Some(at) = cached_at {
            headers.push((
                CACHED_AT_HEADER,
                at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }
        headers
    }
}

/// Runs handlers at most once per idempotency key.
#[derive(Clone)]
pub struct IdempotencyCache {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
    clock: SharedClock,
}

impl IdempotencyCache {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration, clock: SharedClock) -> Self {
        Self { store, ttl, clock }
    }

    pub fn from_relay_config(
        store: Arc<dyn IdempotencyStore>,
        config: &RelayConfig,
        clock: SharedClock,
    ) -> Self {
        Self::new(store, config.idempotency_ttl(), clock)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run `handler` for the request identified by `key`, `path` and `body`,
    /// or replay the recorded response.
    ///
    /// Responses below 500 are recorded until the TTL runs out. A 5xx
    /// response or a handler error removes the pending marker so the client
    /// can retry with the same key. Dropping the returned future before it
    /// completes clears the marker as well.
    pub async fn handle<F, Fut, E>(
        &self,
        key: &str,
        path: &str,
        body: &[u8],
        handler: F,
    ) -> Result<CachedResponse, HandleError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<HandlerResponse, E>>,
    {
        let hash = request_hash(path, body);
        let now = self.clock.now_ms();
        let pending = IdempotencyRecord::pending(key, &hash, now, self.ttl.as_millis() as u64);

        match self.store.begin(&pending).await? {
            BeginOutcome::Started => {}
            BeginOutcome::Existing(existing) => return Ok(Self::replay(existing, &hash)?),
        }
        debug!(key = %key, path = %path, "Idempotent request started");

        // Armed until the final store call returns, so a cancelled request
        // still clears its marker.
        let guard = PendingGuard::arm(self.store.clone(), pending.clone());

        let response = match handler().await {
            Ok(response) => response,
            Err(e) => {
                self.abandon(&pending).await;
                guard.disarm();
                return Err(HandleError::Handler(e));
            }
        };

        if response.status_code >= 500 {
            self.abandon(&pending).await;
            guard.disarm();
            return Ok(CachedResponse::fresh(response));
        }

        let completed =
            pending.completed(response.status_code, response.body.clone(), self.clock.now_ms());
        match self.store.complete(&pending, &completed).await {
            Ok(true) => debug!(key = %key, status = response.status_code, "Response recorded"),
            Ok(false) => {
                warn!(key = %key, "Pending marker vanished before completion; response not recorded")
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to record response"),
        }
        guard.disarm();
        Ok(CachedResponse::fresh(response))
    }

    fn replay(existing: IdempotencyRecord, hash: &str) -> IdempotencyResult<CachedResponse> {
        if existing.request_hash != hash {
            return Err(IdempotencyError::KeyReused { key: existing.key });
        }
        match existing.status {
            RecordStatus::Pending => Err(IdempotencyError::InFlight { key: existing.key }),
            RecordStatus::Completed {
                status_code,
                body,
                completed_at_ms,
            } => {
                info!(key = %existing.key, status = status_code, "Replaying recorded response");
                Ok(CachedResponse {
                    status_code,
                    body,
                    cache_hit: true,
                    cached_at_ms: Some(completed_at_ms),
                })
            }
        }
    }

    async fn abandon(&self, pending: &IdempotencyRecord) {
        if let Err(e) = self.store.abandon(pending).await {
            // The marker expires with the TTL; until then retries see InFlight.
            warn!(key = %pending.key, error = %e, "Failed to clear pending marker");
        }
    }
}

/// Clears a pending marker if `handle` is dropped before it finishes.
struct PendingGuard {
    store: Arc<dyn IdempotencyStore>,
    pending: Option<IdempotencyRecord>,
}

impl PendingGuard {
    fn arm(store: Arc<dyn IdempotencyStore>, pending: IdempotencyRecord) -> Self {
        Self {
            store,
            pending: Some(pending),
        }
    }

    fn disarm(mut self) {
        self.pending = None;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %pending.key, "Request dropped outside a runtime; pending marker left to expire");
            return;
        };
        let store = self.store.clone();
        runtime.spawn(async move {
            match store.abandon(&pending).await {
                Ok(_) => debug!(key = %pending.key, "Cleared marker of cancelled request"),
                Err(e) => {
                    warn!(key = %pending.key, error = %e, "Failed to clear marker of cancelled request")
                }
            }
        });
    }
}
