//! Test harness for relay tests.
//!
//! Every simulated instance shares one outbox, one notifier, one broker and
//! one lease store driven by a manual clock. Leadership only changes when a
//! test ticks an election or moves the clock.

use crate::{
    EventEnvelope, InMemoryBroker, InMemoryNotifier, InMemoryOutboxStore, OutboxProducer,
    OutboxRelay, RelayOptions, RequestContext,
};
use leader_lease::{ElectionConfig, InMemoryLeaseStore, LeaderElection, LeaderHandle, Role};
use relay_core::ManualClock;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const EXCHANGE: &str = "bot-platform";
pub const TTL_MS: u64 = 5_000;
pub const EVENT_TYPE: &str = "inventory.changed";

pub struct Harness {
    pub clock: ManualClock,
    pub leases: InMemoryLeaseStore,
    pub store: InMemoryOutboxStore,
    pub notifier: InMemoryNotifier,
    pub broker: InMemoryBroker,
    pub producer: OutboxProducer,
}

impl Harness {
    pub fn new() -> Self {
        let clock = ManualClock::new(1_700_000_000_000);
        let leases = InMemoryLeaseStore::new(Arc::new(clock.clone()));
        let store = InMemoryOutboxStore::new();
        let notifier = InMemoryNotifier::new();
        let producer = OutboxProducer::new(Arc::new(store.clone()), Arc::new(notifier.clone()));

        Self {
            clock,
            leases,
            store,
            notifier,
            broker: InMemoryBroker::new(),
            producer,
        }
    }

    pub fn election(&self, instance: &str) -> Arc<LeaderElection> {
        Arc::new(LeaderElection::new(
            Arc::new(self.leases.clone()),
            ElectionConfig::new("outbox-relay-leader", instance, Duration::from_millis(TTL_MS)),
            Arc::new(self.clock.clone()),
        ))
    }

    /// An election that has already won the lease.
    pub async fn elected(&self, instance: &str) -> (Arc<LeaderElection>, LeaderHandle) {
        let election = self.election(instance);
        assert_eq!(election.tick().await, Role::Leader);
        let handle = election.handle();
        (election, handle)
    }

    pub fn options(&self) -> RelayOptions {
        RelayOptions::new(EXCHANGE)
            .with_fallback_poll(Duration::from_millis(50))
            .with_publish_timeout(Duration::from_millis(200))
            .with_store_timeout(Duration::from_millis(100))
    }

    pub fn relay(&self, leader: LeaderHandle, options: RelayOptions) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(self.store.clone()),
            Arc::new(self.notifier.clone()),
            Arc::new(self.broker.clone()),
            leader,
            options,
        )
    }

    /// Enqueue events carrying `seq` values `from..to`.
    pub async fn enqueue_range(&self, from: u64, to: u64) -> Vec<EventEnvelope> {
        let mut envelopes = Vec::new();
        for seq in from..to {
            let envelope = self
                .producer
                .enqueue(EVENT_TYPE, &json!({ "seq": seq }), Some("acct:123"), &RequestContext::default())
                .await
                .unwrap();
            envelopes.push(envelope);
        }
        envelopes
    }

    /// `seq` values of everything the broker recorded, in delivery order.
    pub fn published_seqs(&self) -> Vec<u64> {
        self.broker
            .payloads()
            .iter()
            .map(|p| {
                let envelope = EventEnvelope::from_bytes(p).unwrap();
                envelope.data["seq"].as_u64().unwrap()
            })
            .collect()
    }

    pub async fn wait_for_published(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.broker.payloads().len() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} published, saw {}",
                count,
                self.broker.payloads().len()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
