//! Leader election task.

use crate::{LeaseError, LeaseResult, LeaseStore, LeadershipLease};
use relay_core::{RelayConfig, SharedClock};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 16;

/// Election parameters.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Fixed name of the shared lease.
    pub name: String,
    /// Identity of this instance.
    pub holder_id: String,
    pub lease_ttl: Duration,
    /// Kept well below `lease_ttl` so a slow round-trip does not cost leadership.
    pub renew_interval: Duration,
    /// Consecutive storage failures a leader tolerates before stepping down.
    pub retry_budget: u32,
    /// A store call with no answer by then counts as a storage failure.
    pub call_timeout: Duration,
}

impl ElectionConfig {
    pub fn new(name: impl Into<String>, holder_id: impl Into<String>, lease_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            holder_id: holder_id.into(),
            lease_ttl,
            renew_interval: lease_ttl / 3,
            retry_budget: 3,
            call_timeout: lease_ttl / 3,
        }
    }

    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            name: config.election.name.clone(),
            holder_id: config.instance_id.clone(),
            lease_ttl: config.lease_ttl(),
            renew_interval: config.renew_interval(),
            retry_budget: config.election.retry_budget,
            call_timeout: config.store_timeout().min(config.renew_interval()),
        }
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Election role of this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Snapshot of this instance's leadership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipStatus {
    pub role: Role,
    pub term: Option<u64>,
    /// Local view of the lease expiry; zero when not leader.
    pub expires_at_ms: u64,
}

impl LeadershipStatus {
    fn follower() -> Self {
        Self {
            role: Role::Follower,
            term: None,
            expires_at_ms: 0,
        }
    }

    fn leader(lease: &LeadershipLease) -> Self {
        Self {
            role: Role::Leader,
            term: Some(lease.term),
            expires_at_ms: lease.expires_at_ms,
        }
    }

    /// Leader with a lease that has not run out at `now_ms`.
    pub fn is_live_leader(&self, now_ms: u64) -> bool {
        self.role == Role::Leader && now_ms < self.expires_at_ms
    }
}

/// Why an instance stopped being leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemotionReason {
    /// Renewal found the lease gone or held by someone else.
    LeaseLost,
    /// The local lease ran out before a renewal succeeded.
    LeaseExpired,
    /// The store stayed unreachable past the retry budget.
    StorageUnavailable,
    /// The instance released the lease while shutting down.
    Shutdown,
}

/// Leadership transitions, emitted once per transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipEvent {
    Elected { term: u64 },
    Demoted { term: Option<u64>, reason: DemotionReason },
}

/// Cheap, cloneable view of leadership.
#[derive(Debug, Clone)]
pub struct LeaderHandle {
    status: watch::Receiver<LeadershipStatus>,
    clock: SharedClock,
}

impl LeaderHandle {
    /// Whether this instance holds a lease that has not expired locally.
    /// Does not touch the store.
    pub fn is_leader(&self) -> bool {
        self.status.borrow().is_live_leader(self.clock.now_ms())
    }

    pub fn status(&self) -> LeadershipStatus {
        self.status.borrow().clone()
    }

    /// Wait for the next status change. Returns `false` once the election is gone.
    pub async fn changed(&mut self) -> bool {
        self.status.changed().await.is_ok()
    }
}

/// Runs acquire/renew rounds against a [`LeaseStore`].
pub struct LeaderElection {
    store: Arc<dyn LeaseStore>,
    config: ElectionConfig,
    clock: SharedClock,
    status: watch::Sender<LeadershipStatus>,
    events: broadcast::Sender<LeadershipEvent>,
    consecutive_failures: AtomicU32,
}

impl LeaderElection {
    pub fn new(store: Arc<dyn LeaseStore>, config: ElectionConfig, clock: SharedClock) -> Self {
        let (status, _) = watch::channel(LeadershipStatus::follower());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            config,
            clock,
            status,
            events,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn handle(&self) -> LeaderHandle {
        LeaderHandle {
            status: self.status.subscribe(),
            clock: self.clock.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> LeadershipStatus {
        self.status.borrow().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.status.borrow().is_live_leader(self.clock.now_ms())
    }

    /// One acquire-or-renew round. Returns the role after the round.
    pub async fn tick(&self) -> Role {
        let previous = self.status();
        let now = self.clock.now_ms();
        let holding = previous.is_live_leader(now);

        if previous.role == Role::Leader && !holding {
            self.demote(previous.term, DemotionReason::LeaseExpired);
        }
        if !holding {
            self.status.send_replace(LeadershipStatus {
                role: Role::Candidate,
                ..LeadershipStatus::follower()
            });
        }

        let attempt = if holding {
            self.bounded(self.store.renew(
                &self.config.name,
                &self.config.holder_id,
                self.config.lease_ttl,
            ))
            .await
        } else {
            self.bounded(self.store.try_acquire(
                &self.config.name,
                &self.config.holder_id,
                self.config.lease_ttl,
            ))
            .await
        };

        match attempt {
            Ok(Some(lease)) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.status.send_replace(LeadershipStatus::leader(&lease));
                if !holding {
                    info!(
                        name = %self.config.name,
                        holder = %self.config.holder_id,
                        term = lease.term,
                        "Elected leader"
                    );
                    let _ = self.events.send(LeadershipEvent::Elected { term: lease.term });
                } else {
                    debug!(term = lease.term, expires_at_ms = lease.expires_at_ms, "Lease renewed");
                }
                Role::Leader
            }
            Ok(None) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                if holding {
                    self.demote(previous.term, DemotionReason::LeaseLost);
                } else {
                    self.status.send_replace(LeadershipStatus::follower());
                }
                Role::Follower
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    name = %self.config.name,
                    holder = %self.config.holder_id,
                    failures,
                    error = %e,
                    "Lease store call failed"
                );

                if !holding {
                    self.status.send_replace(LeadershipStatus::follower());
                    return Role::Follower;
                }
                if failures >= self.config.retry_budget {
                    self.demote(previous.term, DemotionReason::StorageUnavailable);
                    return Role::Follower;
                }
                // Still inside the lease; `is_leader` keeps checking its expiry.
                Role::Leader
            }
        }
    }

    /// Run a store call, failing it once `call_timeout` passes.
    async fn bounded<T>(&self, call: impl Future<Output = LeaseResult<T>>) -> LeaseResult<T> {
        let timeout = self.config.call_timeout;
        tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
            Err(LeaseError::Unavailable(format!(
                "no answer within {} ms",
                timeout.as_millis()
            )))
        })
    }

    fn demote(&self, term: Option<u64>, reason: DemotionReason) {
        self.status.send_replace(LeadershipStatus::follower());
        warn!(
            name = %self.config.name,
            holder = %self.config.holder_id,
            term = ?term,
            reason = ?reason,
            "Demoted from leader"
        );
        let _ = self.events.send(LeadershipEvent::Demoted { term, reason });
    }

    /// Release the lease if held and drop to follower.
    pub async fn step_down(&self) {
        let status = self.status();
        if status.role != Role::Leader {
            return;
        }

        match self
            .bounded(self.store.release(&self.config.name, &self.config.holder_id))
            .await
        {
            Ok(released) => debug!(released, "Released leadership lease"),
            Err(e) => warn!(error = %e, "Failed to release lease; it will expire on its own"),
        }
        self.demote(status.term, DemotionReason::Shutdown);
    }

    /// Run rounds every `renew_interval` until `shutdown` flips to true or its
    /// sender goes away, then step down.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            name = %self.config.name,
            holder = %self.config.holder_id,
            ttl_ms = self.config.lease_ttl.as_millis() as u64,
            renew_ms = self.config.renew_interval.as_millis() as u64,
            "Starting leader election"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.renew_interval) => {}
            }
        }

        self.step_down().await;
        debug!("Leader election task stopped");
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryLeaseStore;
    use relay_core::ManualClock;

    fn election(store: &InMemoryLeaseStore, clock: &ManualClock, id: &str) -> LeaderElection {
        LeaderElection::new(
            Arc::new(store.clone()),
            ElectionConfig::new("leader", id, Duration::from_millis(3_000))
                .with_retry_budget(2),
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn config_defaults_renew_to_a_third_of_ttl() {
        let config = ElectionConfig::new("n", "h", Duration::from_millis(3_000));
        assert_eq!(config.renew_interval, Duration::from_millis(1_000));
        assert_eq!(config.call_timeout, Duration::from_millis(1_000));
        assert_eq!(config.retry_budget, 3);
    }

    #[tokio::test]
    async fn first_tick_elects_and_emits_once() {
        let clock = ManualClock::new(0);
        let store = InMemoryLeaseStore::new(Arc::new(clock.clone()));
        let a = election(&store, &clock, "a");
        let mut events = a.subscribe();

        assert_eq!(a.tick().await, Role::Leader);
        clock.advance_ms(1_000);
        assert_eq!(a.tick().await, Role::Leader);

        assert_eq!(events.try_recv().unwrap(), LeadershipEvent::Elected { term: 1 });
        assert!(events.try_recv().is_err());
        assert!(a.handle().is_leader());
    }

    #[tokio::test]
    async fn handle_goes_stale_when_lease_runs_out() {
        let clock = ManualClock::new(0);
        let store = InMemoryLeaseStore::new(Arc::new(clock.clone()));
        let a = election(&store, &clock, "a");
        a.tick().await;

        let handle = a.handle();
        assert!(handle.is_leader());
        clock.advance_ms(3_000);
        assert!(!handle.is_leader());
    }

    #[tokio::test]
    async fn storage_errors_demote_after_budget() {
        let clock = ManualClock::new(0);
        let store = InMemoryLeaseStore::new(Arc::new(clock.clone()));
        let a = election(&store, &clock, "a");
        let mut events = a.subscribe();
        a.tick().await;
        let _ = events.try_recv();

        store.set_unavailable(true);
        assert_eq!(a.tick().await, Role::Leader);
        assert_eq!(a.tick().await, Role::Follower);
        assert_eq!(
            events.try_recv().unwrap(),
            LeadershipEvent::Demoted {
                term: Some(1),
                reason: DemotionReason::StorageUnavailable
            }
        );
    }

    #[tokio::test]
    async fn follower_with_unreachable_store_stays_follower() {
        let clock = ManualClock::new(0);
        let store = InMemoryLeaseStore::new(Arc::new(clock.clone()));
        store.set_unavailable(true);
        let a = election(&store, &clock, "a");

        assert_eq!(a.tick().await, Role::Follower);
        assert!(!a.is_leader());
    }
}
