//! Outbox storage primitives.

use crate::{OutboxError, OutboxResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Durable, ordered list of serialized envelopes shared by every instance.
///
/// Each call must be atomic against callers in other processes. Entries are
/// appended at the newest end, read from the oldest end, and removed by value
/// so a concurrent writer never shifts what the relay is about to delete.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Append at the newest end. Returns the list length after the append.
    async fn append(&self, entry: &[u8]) -> OutboxResult<u64>;

    /// The oldest entry, left in place.
    async fn peek_oldest(&self) -> OutboxResult<Option<Vec<u8>>>;

    /// Remove the oldest entry equal to `entry`. Returns whether one was removed.
    async fn remove_one(&self, entry: &[u8]) -> OutboxResult<bool>;

    /// Move an undecodable entry out of the outbox into the quarantine list.
    async fn quarantine(&self, entry: &[u8]) -> OutboxResult<()>;

    /// Number of pending entries.
    async fn len(&self) -> OutboxResult<u64>;
}

#[derive(Debug, Default)]
struct OutboxState {
    entries: VecDeque<Vec<u8>>,
    quarantined: Vec<Vec<u8>>,
}

/// Appends staged inside [`InMemoryOutboxStore::atomically`].
#[derive(Debug, Default)]
pub struct OutboxTransaction {
    staged: Vec<Vec<u8>>,
}

impl OutboxTransaction {
    pub fn append(&mut self, entry: impl Into<Vec<u8>>) {
        self.staged.push(entry.into());
    }
}

/// Process-shared outbox. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<OutboxState>>,
    unavailable: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one unit: its staged appends land only if it returns `Ok`.
    ///
    /// The store lock is held for the whole closure, so keep it short.
    pub fn atomically<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut OutboxTransaction) -> Result<T, E>,
    {
        let mut state = self.state.lock();
        let mut tx = OutboxTransaction::default();
        let value = f(&mut tx)?;
        state.entries.extend(tx.staged);
        Ok(value)
    }

    /// Make every operation fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every operation hang without answering, like a Redis node that
    /// stopped responding.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Snapshot of pending entries, oldest first.
    pub fn entries(&self) -> Vec<Vec<u8>> {
        self.state.lock().entries.iter().cloned().collect()
    }

    pub fn quarantined(&self) -> Vec<Vec<u8>> {
        self.state.lock().quarantined.clone()
    }

    async fn check_available(&self) -> OutboxResult<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            Err(OutboxError::Storage("in-memory outbox switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, entry: &[u8]) -> OutboxResult<u64> {
        self.check_available().await?;
        let mut state = self.state.lock();
        state.entries.push_back(entry.to_vec());
        Ok(state.entries.len() as u64)
    }

    async fn peek_oldest(&self) -> OutboxResult<Option<Vec<u8>>> {
        self.check_available().await?;
        Ok(self.state.lock().entries.front().cloned())
    }

    async fn remove_one(&self, entry: &[u8]) -> OutboxResult<bool> {
        self.check_available().await?;
        let mut state = self.state.lock();
        match state.entries.iter().position(|e| e.as_slice() == entry) {
            Some(index) => {
                state.entries.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn quarantine(&self, entry: &[u8]) -> OutboxResult<()> {
        self.check_available().await?;
        let mut state = self.state.lock();
        if let Some(index) = state.entries.iter().position(|e| e.as_slice() == entry) {
            state.entries.remove(index);
        }
        state.quarantined.push(entry.to_vec());
        Ok(())
    }

    async fn len(&self) -> OutboxResult<u64> {
        self.check_available().await?;
        Ok(self.state.lock().entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_returns_growing_position() {
        let store = InMemoryOutboxStore::new();
        assert_eq!(store.append(b"a").await.unwrap(), 1);
        assert_eq!(store.append(b"b").await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn remove_is_by_value_and_first_match_only() {
        let store = InMemoryOutboxStore::new();
        store.append(b"x").await.unwrap();
        store.append(b"y").await.unwrap();
        store.append(b"x").await.unwrap();

        assert!(store.remove_one(b"x").await.unwrap());
        assert_eq!(store.entries(), vec![b"y".to_vec(), b"x".to_vec()]);
        assert!(!store.remove_one(b"z").await.unwrap());
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let store = InMemoryOutboxStore::new();
        assert!(store.peek_oldest().await.unwrap().is_none());
        store.append(b"a").await.unwrap();
        assert_eq!(store.peek_oldest().await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.peek_oldest().await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn failed_unit_appends_nothing() {
        let store = InMemoryOutboxStore::new();
        let mut balance = 10;

        let result: Result<(), &str> = store.atomically(|tx| {
            tx.append(b"debited".to_vec());
            if balance < 50 {
                return Err("insufficient funds");
            }
            balance -= 50;
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(balance, 10);
        assert_eq!(store.len().await.unwrap(), 0);

        store
            .atomically(|tx| {
                tx.append(b"credited".to_vec());
                balance += 5;
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(balance, 15);
        assert_eq!(store.entries(), vec![b"credited".to_vec()]);
    }

    #[tokio::test]
    async fn quarantine_moves_entry() {
        let store = InMemoryOutboxStore::new();
        store.append(b"bad").await.unwrap();
        store.append(b"good").await.unwrap();

        store.quarantine(b"bad").await.unwrap();
        assert_eq!(store.entries(), vec![b"good".to_vec()]);
        assert_eq!(store.quarantined(), vec![b"bad".to_vec()]);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = InMemoryOutboxStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.append(b"a").await, Err(OutboxError::Storage(_))));
        assert!(store.peek_oldest().await.is_err());
    }
}
