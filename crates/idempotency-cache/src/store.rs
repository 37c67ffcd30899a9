//! Idempotency record storage.

use crate::{IdempotencyRecord, IdempotencyResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::SharedClock;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of placing a pending marker.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// The marker was inserted; the caller owns the request.
    Started,
    /// A live record already exists for the key.
    Existing(IdempotencyRecord),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Insert `pending` only if no live record exists for its key. Atomic.
    async fn begin(&self, pending: &IdempotencyRecord) -> IdempotencyResult<BeginOutcome>;

    /// Replace `pending` with `completed`, keeping the original expiry.
    /// Returns `false` if the marker is gone (expired or abandoned).
    async fn complete(
        &self,
        pending: &IdempotencyRecord,
        completed: &IdempotencyRecord,
    ) -> IdempotencyResult<bool>;

    /// Delete `pending` if it is still the stored record.
    async fn abandon(&self, pending: &IdempotencyRecord) -> IdempotencyResult<bool>;

    /// The live record for `key`, if any.
    async fn get(&self, key: &str) -> IdempotencyResult<Option<IdempotencyRecord>>;
}

/// Per-process store. Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<Mutex<HashMap<String, IdempotencyRecord>>>,
    clock: SharedClock,
}

impl InMemoryIdempotencyStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(entries: &mut HashMap<String, IdempotencyRecord>, now_ms: u64) {
        entries.retain(|_, record| !record.is_expired(now_ms));
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn begin(&self, pending: &IdempotencyRecord) -> IdempotencyResult<BeginOutcome> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, now);

        if let Some(existing) = entries.get(&pending.key) {
            return Ok(BeginOutcome::Existing(existing.clone()));
        }
        entries.insert(pending.key.clone(), pending.clone());
        Ok(BeginOutcome::Started)
    }

    async fn complete(
        &self,
        pending: &IdempotencyRecord,
        completed: &IdempotencyRecord,
    ) -> IdempotencyResult<bool> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();

        match entries.get_mut(&pending.key) {
            Some(record) if record == pending && !record.is_expired(now) => {
                *record = completed.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn abandon(&self, pending: &IdempotencyRecord) -> IdempotencyResult<bool> {
        let mut entries = self.entries.lock();
        if entries.get(&pending.key) == Some(pending) {
            entries.remove(&pending.key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn get(&self, key: &str) -> IdempotencyResult<Option<IdempotencyRecord>> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, now);
        Ok(entries.get(key).cloned())
    }
}
