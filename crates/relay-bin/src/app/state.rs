//! Relay process state.

use event_outbox::{
    BrokerPublisher, HttpBroker, Notifier, OutboxRelay, OutboxStore, RedisNotifier,
    RedisOutboxStore, RedisStreamBroker, RelayOptions,
};
use idempotency_cache::{
    IdempotencyCache, IdempotencyStore, InMemoryIdempotencyStore, RedisIdempotencyStore,
};
use leader_lease::{ElectionConfig, LeaderElection, LeaseStore, RedisLeaseStore};
use relay_core::{BrokerKind, RelayConfig, SystemClock};
use resource_lock::{DurationClass, LockDurations, LockManager, RedisLockBackend};
use std::sync::Arc;
use tracing::info;

/// Everything the relay process shares, built once at startup.
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub outbox: Arc<dyn OutboxStore>,
    pub notifier: Arc<dyn Notifier>,
    pub broker: Arc<dyn BrokerPublisher>,
    pub election: Arc<LeaderElection>,
    /// Per-resource critical sections for request handlers.
    #[allow(dead_code)]
    pub locks: LockManager,
    /// Replay cache for mutating requests.
    #[allow(dead_code)]
    pub idempotency: IdempotencyCache,
}

impl RelayState {
    pub async fn connect(config: RelayConfig) -> anyhow::Result<Self> {
        let clock = SystemClock::shared();
        let redis_url = config.redis_url.as_str();

        let leases: Arc<dyn LeaseStore> =
            Arc::new(RedisLeaseStore::connect(redis_url, clock.clone()).await?);
        let outbox: Arc<dyn OutboxStore> =
            Arc::new(RedisOutboxStore::connect(redis_url, config.outbox_key()).await?);
        let notifier: Arc<dyn Notifier> =
            Arc::new(RedisNotifier::connect(redis_url, &config.exchange_name).await?);

        let broker: Arc<dyn BrokerPublisher> = match config.broker.kind {
            BrokerKind::RedisStream => Arc::new(RedisStreamBroker::connect(redis_url).await?),
            BrokerKind::Http => Arc::new(HttpBroker::new(&config.broker, config.publish_timeout())?),
        };

        let election = Arc::new(LeaderElection::new(
            Arc::clone(&leases),
            ElectionConfig::from_relay_config(&config),
            clock.clone(),
        ));

        let lock_nodes = config.lock_nodes();
        let locks = LockManager::new(
            Arc::new(RedisLockBackend::connect(&lock_nodes, clock.clone()).await?),
            LockDurations::from_settings(&config.lock),
            clock.clone(),
        );

        let idempotency_store: Arc<dyn IdempotencyStore> = if config.idempotency.shared {
            Arc::new(RedisIdempotencyStore::connect(redis_url, clock.clone()).await?)
        } else {
            Arc::new(InMemoryIdempotencyStore::new(clock.clone()))
        };
        let idempotency =
            IdempotencyCache::from_relay_config(idempotency_store, &config, clock.clone());

        info!(
            instance_id = %config.instance_id,
            outbox_key = %config.outbox_key(),
            broker = ?config.broker.kind,
            lock_nodes = lock_nodes.len(),
            idempotency_shared = config.idempotency.shared,
            idempotency_ttl_secs = idempotency.ttl().as_secs(),
            lock_medium_ttl_ms = locks.durations().ttl(DurationClass::Medium).as_millis() as u64,
            "Relay state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            outbox,
            notifier,
            broker,
            election,
            locks,
            idempotency,
        })
    }

    /// A drain loop following this process's election.
    pub fn relay(&self) -> OutboxRelay {
        OutboxRelay::new(
            Arc::clone(&self.outbox),
            Arc::clone(&self.notifier),
            Arc::clone(&self.broker),
            self.election.handle(),
            RelayOptions::from_relay_config(&self.config),
        )
    }
}
