//! Lease storage primitives.

use crate::{LeadershipLease, LeaseError, LeaseResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::SharedClock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Atomic lease operations against a shared key.
///
/// Every method must be atomic with respect to callers in other processes;
/// the election logic never does read-modify-write on top of them.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease if it is absent or expired, or extend it if `holder_id`
    /// already holds it. Returns `None` when another holder owns a live lease.
    async fn try_acquire(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> LeaseResult<Option<LeadershipLease>>;

    /// Extend the lease only if `holder_id` currently owns it.
    async fn renew(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> LeaseResult<Option<LeadershipLease>>;

    /// Drop the lease if `holder_id` owns it. Returns whether it was dropped.
    async fn release(&self, name: &str, holder_id: &str) -> LeaseResult<bool>;

    /// The live lease, if any.
    async fn current(&self, name: &str) -> LeaseResult<Option<LeadershipLease>>;
}

#[derive(Debug, Default)]
struct Slot {
    lease: Option<LeadershipLease>,
    last_term: u64,
}

/// Process-shared lease store. Clones share state, so several simulated
/// instances can race against one store with one clock.
#[derive(Debug, Clone)]
pub struct InMemoryLeaseStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    clock: SharedClock,
    unavailable: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl InMemoryLeaseStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
            stalled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every operation fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every operation hang without answering.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    async fn check_available(&self) -> LeaseResult<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LeaseError::Unavailable("in-memory store switched off".into()))
        } else {
            Ok(())
        }
    }

    fn expires_at(&self, now: u64, ttl: Duration) -> u64 {
        now.saturating_add(ttl.as_millis() as u64)
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> LeaseResult<Option<LeadershipLease>> {
        self.check_available().await?;
        let now = self.clock.now_ms();
        let mut slots = self.slots.lock();
        let slot = slots.entry(name.to_string()).or_default();
        let expires_at_ms = self.expires_at(now, ttl);

        let live_holder = slot
            .lease
            .as_ref()
            .filter(|lease| !lease.is_expired(now))
            .map(|lease| lease.is_held_by(holder_id));

        match live_holder {
            Some(false) => Ok(None),
            Some(true) => Ok(slot.lease.as_mut().map(|lease| {
                lease.expires_at_ms = expires_at_ms;
                lease.clone()
            })),
            None => {
                slot.last_term += 1;
                let lease = LeadershipLease {
                    holder_id: holder_id.to_string(),
                    term: slot.last_term,
                    expires_at_ms,
                };
                slot.lease = Some(lease.clone());
                Ok(Some(lease))
            }
        }
    }

    async fn renew(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> LeaseResult<Option<LeadershipLease>> {
        self.check_available().await?;
        let now = self.clock.now_ms();
        let expires_at_ms = self.expires_at(now, ttl);
        let mut slots = self.slots.lock();

        let lease = slots
            .get_mut(name)
            .and_then(|slot| slot.lease.as_mut())
            .filter(|lease| !lease.is_expired(now) && lease.is_held_by(holder_id))
            .map(|lease| {
                lease.expires_at_ms = expires_at_ms;
                lease.clone()
            });
        Ok(lease)
    }

    async fn release(&self, name: &str, holder_id: &str) -> LeaseResult<bool> {
        self.check_available().await?;
        let mut slots = self.slots.lock();

        match slots.get_mut(name) {
            Some(slot) if slot.lease.as_ref().is_some_and(|l| l.is_held_by(holder_id)) => {
                slot.lease = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current(&self, name: &str) -> LeaseResult<Option<LeadershipLease>> {
        self.check_available().await?;
        let now = self.clock.now_ms();
        let slots = self.slots.lock();

        Ok(slots
            .get(name)
            .and_then(|slot| slot.lease.clone())
            .filter(|lease| !lease.is_expired(now)))
    }
}
