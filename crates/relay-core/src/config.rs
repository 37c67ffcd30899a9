//! Configuration management for the relay.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_EXCHANGE: &str = "bot-platform";
const DEFAULT_ELECTION_NAME: &str = "outbox-relay-leader";

/// Main relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Redis connection URL for the outbox, notifications and leases.
    pub redis_url: String,
    /// Broker exchange that relayed events are published to.
    pub exchange_name: String,
    /// Identity of this instance in leadership leases.
    pub instance_id: String,
    pub election: ElectionSettings,
    pub relay: RelaySettings,
    pub broker: BrokerSettings,
    pub lock: LockSettings,
    pub idempotency: IdempotencySettings,
}

/// Leader election timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSettings {
    /// Fixed name of the shared election lease.
    pub name: String,
    pub lease_ttl_ms: u64,
    /// Renewal period. Zero means one third of the lease TTL.
    pub renew_interval_ms: u64,
    /// Consecutive storage failures tolerated before a leader steps down.
    pub retry_budget: u32,
}

/// Drain loop timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub fallback_poll_ms: u64,
    pub publish_timeout_ms: u64,
    /// Bound on each outbox and lease store call.
    pub store_timeout_ms: u64,
    /// Outbox list key. Empty means `<exchange>:outbox`.
    pub outbox_key: String,
}

/// Which broker the relay publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrokerKind {
    /// `XADD` into `<exchange>:<routing key>` on the relay's Redis.
    RedisStream,
    /// RabbitMQ management HTTP publish endpoint.
    Http,
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub kind: BrokerKind,
    /// Management API base URL, e.g. `http://127.0.0.1:15672`.
    pub management_url: String,
    pub vhost: String,
    pub username: String,
    pub password: String,
}

/// Lock duration classes and quorum nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub short_ms: u64,
    pub medium_ms: u64,
    pub long_ms: u64,
    /// Safety multiplier applied to every class to absorb clock skew.
    pub duration_multiplier: f64,
    /// How long before expiry the lease is extended.
    pub extension_threshold_ms: u64,
    /// Redis URLs of the quorum nodes. Empty means `[redis_url]`.
    pub nodes: Vec<String>,
}

/// Idempotency cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    pub ttl_secs: u64,
    /// Use the Redis-backed store so retries routed to other instances are de-duplicated.
    pub shared: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            exchange_name: DEFAULT_EXCHANGE.to_string(),
            instance_id: format!("relay-{}", uuid::Uuid::new_v4()),
            election: ElectionSettings::default(),
            relay: RelaySettings::default(),
            broker: BrokerSettings::default(),
            lock: LockSettings::default(),
            idempotency: IdempotencySettings::default(),
        }
    }
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_ELECTION_NAME.to_string(),
            lease_ttl_ms: 5_000,
            renew_interval_ms: 0,
            retry_budget: 3,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            fallback_poll_ms: 1_000,
            publish_timeout_ms: 5_000,
            store_timeout_ms: 2_000,
            outbox_key: String::new(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            kind: BrokerKind::RedisStream,
            management_url: "http://127.0.0.1:15672".to_string(),
            vhost: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            short_ms: 5_000,
            medium_ms: 30_000,
            long_ms: 120_000,
            duration_multiplier: 1.5,
            extension_threshold_ms: 500,
            nodes: Vec::new(),
        }
    }
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            shared: false,
        }
    }
}

impl RelayConfig {
    /// Create a new RelayConfig with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from a file when it exists, falling back to defaults,
    /// then apply environment overrides and validate.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis_url = url;
        }
        if let Ok(exchange) = std::env::var("RELAY_EXCHANGE") {
            self.exchange_name = exchange;
        }
        if let Ok(instance_id) = std::env::var("RELAY_INSTANCE_ID") {
            self.instance_id = instance_id;
        }
        if let Ok(log_level) = std::env::var("RELAY_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("RELAY_BROKER_URL") {
            self.broker.kind = BrokerKind::Http;
            self.broker.management_url = url;
        }
    }

    /// Reject settings that would break the election or lock invariants.
    pub fn validate(&self) -> CoreResult<()> {
        self.redis_url()?;

        if self.exchange_name.trim().is_empty() {
            return Err(CoreError::Config("exchange_name must not be empty".into()));
        }
        if self.instance_id.trim().is_empty() {
            return Err(CoreError::Config("instance_id must not be empty".into()));
        }
        if self.election.name.trim().is_empty() {
            return Err(CoreError::Config("election.name must not be empty".into()));
        }
        if self.election.lease_ttl_ms == 0 {
            return Err(CoreError::Config("election.lease_ttl_ms must be positive".into()));
        }
        if self.renew_interval() >= self.lease_ttl() {
            return Err(CoreError::Config(format!(
                "election.renew_interval_ms ({}) must be shorter than lease_ttl_ms ({})",
                self.renew_interval().as_millis(),
                self.election.lease_ttl_ms
            )));
        }
        if self.lock.duration_multiplier < 1.0 {
            return Err(CoreError::Config(format!(
                "lock.duration_multiplier must be at least 1.0, got {}",
                self.lock.duration_multiplier
            )));
        }
        if self.lock.extension_threshold_ms >= self.lock.short_ms {
            return Err(CoreError::Config(format!(
                "lock.extension_threshold_ms ({}) must be shorter than lock.short_ms ({})",
                self.lock.extension_threshold_ms, self.lock.short_ms
            )));
        }
        if self.broker.kind == BrokerKind::Http {
            Url::parse(&self.broker.management_url)?;
        }
        if self.relay.fallback_poll_ms == 0 {
            return Err(CoreError::Config("relay.fallback_poll_ms must be positive".into()));
        }
        if self.relay.publish_timeout_ms == 0 {
            return Err(CoreError::Config("relay.publish_timeout_ms must be positive".into()));
        }
        if self.relay.store_timeout_ms == 0 {
            return Err(CoreError::Config("relay.store_timeout_ms must be positive".into()));
        }
        if self.idempotency.ttl_secs == 0 {
            return Err(CoreError::Config("idempotency.ttl_secs must be positive".into()));
        }
        Ok(())
    }

    /// Get the Redis URL as a parsed URL.
    pub fn redis_url(&self) -> CoreResult<Url> {
        Url::parse(&self.redis_url).map_err(CoreError::from)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.election.lease_ttl_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        if self.election.renew_interval_ms == 0 {
            self.lease_ttl() / 3
        } else {
            Duration::from_millis(self.election.renew_interval_ms)
        }
    }

    pub fn fallback_poll(&self) -> Duration {
        Duration::from_millis(self.relay.fallback_poll_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.relay.publish_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.relay.store_timeout_ms)
    }

    pub fn outbox_key(&self) -> String {
        if self.relay.outbox_key.is_empty() {
            format!("{}:outbox", self.exchange_name)
        } else {
            self.relay.outbox_key.clone()
        }
    }

    pub fn lock_nodes(&self) -> Vec<String> {
        if self.lock.nodes.is_empty() {
            vec![self.redis_url.clone()]
        } else {
            self.lock.nodes.clone()
        }
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency.ttl_secs)
    }
}
