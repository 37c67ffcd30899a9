//! Lock backend primitives.

use crate::{LockError, LockLease, LockResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::SharedClock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Atomic multi-resource lock primitive.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Lock every resource or none. Contention fails fast with
    /// [`LockError::Locked`].
    async fn acquire(&self, resources: &[String], ttl: Duration) -> LockResult<LockLease>;

    /// Push the expiry of a lease this caller still owns.
    async fn extend(&self, lease: &LockLease, ttl: Duration) -> LockResult<LockLease>;

    /// Drop whatever part of the lease this caller still owns.
    async fn release(&self, lease: &LockLease) -> LockResult<()>;
}

#[derive(Debug, Clone, Copy)]
struct Held {
    token: Uuid,
    expires_at_ms: u64,
}

#[derive(Debug, Default)]
struct LockTable {
    held: HashMap<String, Held>,
    fence: u64,
}

/// Process-shared lock table. Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryLockBackend {
    table: Arc<Mutex<LockTable>>,
    clock: SharedClock,
    refuse_extend: Arc<AtomicBool>,
    stall_extend: Arc<AtomicBool>,
}

impl InMemoryLockBackend {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            table: Arc::new(Mutex::new(LockTable::default())),
            clock,
            refuse_extend: Arc::new(AtomicBool::new(false)),
            stall_extend: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every extension fail, as when the lock nodes become unreachable.
    pub fn set_refuse_extend(&self, refuse: bool) {
        self.refuse_extend.store(refuse, Ordering::SeqCst);
    }

    /// Make every extension hang without answering.
    pub fn set_stall_extend(&self, stall: bool) {
        self.stall_extend.store(stall, Ordering::SeqCst);
    }

    pub fn is_held(&self, resource: &str) -> bool {
        let now = self.clock.now_ms();
        self.table
            .lock()
            .held
            .get(resource)
            .is_some_and(|h| h.expires_at_ms > now)
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn acquire(&self, resources: &[String], ttl: Duration) -> LockResult<LockLease> {
        let now = self.clock.now_ms();
        let mut table = self.table.lock();

        let busy: Vec<String> = resources
            .iter()
            .filter(|r| table.held.get(*r).is_some_and(|h| h.expires_at_ms > now))
            .cloned()
            .collect();
        if !busy.is_empty() {
            return Err(LockError::Locked { resources: busy });
        }

        let token = Uuid::new_v4();
        let expires_at_ms = now.saturating_add(ttl.as_millis() as u64);
        for resource in resources {
            table.held.insert(
                resource.clone(),
                Held {
                    token,
                    expires_at_ms,
                },
            );
        }
        table.fence += 1;

        Ok(LockLease {
            resources: resources.to_vec(),
            token,
            fence: table.fence,
            expires_at_ms,
        })
    }

    async fn extend(&self, lease: &LockLease, ttl: Duration) -> LockResult<LockLease> {
        if self.stall_extend.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.refuse_extend.load(Ordering::SeqCst) {
            return Err(LockError::Unavailable("extension refused".into()));
        }

        let now = self.clock.now_ms();
        let mut table = self.table.lock();
        let owned = lease.resources.iter().all(|r| {
            table
                .held
                .get(r)
                .is_some_and(|h| h.token == lease.token && h.expires_at_ms > now)
        });
        if !owned {
            return Err(LockError::Lost(format!("lease {} expired or taken", lease.token)));
        }

        let expires_at_ms = now.saturating_add(ttl.as_millis() as u64);
        for resource in &lease.resources {
            if let Some(held) = table.held.get_mut(resource) {
                held.expires_at_ms = expires_at_ms;
            }
        }
        Ok(LockLease {
            expires_at_ms,
            ..lease.clone()
        })
    }

    async fn release(&self, lease: &LockLease) -> LockResult<()> {
        let mut table = self.table.lock();
        table
            .held
            .retain(|resource, held| !(held.token == lease.token && lease.resources.contains(resource)));
        Ok(())
    }
}
