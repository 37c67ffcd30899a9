//! Broker publishers.

use crate::{OutboxError, OutboxResult};
use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use relay_core::BrokerSettings;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Broker's answer to a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAck {
    /// Delivery confirmed; the entry may be removed.
    Ack,
    /// The broker refused the message; the entry must stay.
    Nack,
}

/// Publish interface. Only [`PublishAck::Ack`] makes an entry removable;
/// `Nack` and `Err` both leave it in the outbox.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> OutboxResult<PublishAck>;
}

/// Publisher appending to a Redis stream per routing key.
#[derive(Clone)]
pub struct RedisStreamBroker {
    conn: MultiplexedConnection,
}

impl RedisStreamBroker {
    pub async fn connect(redis_url: &str) -> OutboxResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    pub fn stream_key(exchange: &str, routing_key: &str) -> String {
        format!("{}:{}", exchange, routing_key)
    }
}

#[async_trait]
impl BrokerPublisher for RedisStreamBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> OutboxResult<PublishAck> {
        let mut conn = self.conn.clone();
        let key = Self::stream_key(exchange, routing_key);
        let id: Option<String> = conn.xadd(&key, "*", &[("payload", payload)]).await?;

        debug!(stream = %key, id = ?id, "Appended to broker stream");
        Ok(if id.is_some() {
            PublishAck::Ack
        } else {
            PublishAck::Nack
        })
    }
}

#[derive(Debug, Serialize)]
struct PublishProperties {
    content_type: &'static str,
    delivery_mode: u8,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    properties: PublishProperties,
    routing_key: &'a str,
    payload: String,
    payload_encoding: &'static str,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    routed: bool,
}

/// Publisher for the RabbitMQ management API.
///
/// A message that was routed to at least one queue is an ack; an unroutable
/// one is a nack.
pub struct HttpBroker {
    client: reqwest::Client,
    base_url: String,
    vhost: String,
    username: String,
    password: String,
}

impl HttpBroker {
    pub fn new(settings: &BrokerSettings, timeout: Duration) -> OutboxResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: settings.management_url.trim_end_matches('/').to_string(),
            vhost: settings.vhost.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn publish_url(&self, exchange: &str) -> String {
        format!(
            "{}/api/exchanges/{}/{}/publish",
            self.base_url,
            self.vhost.replace('/', "%2F"),
            exchange
        )
    }

    fn request_body<'a>(routing_key: &'a str, payload: &[u8]) -> PublishRequest<'a> {
        PublishRequest {
            properties: PublishProperties {
                content_type: "application/json",
                delivery_mode: 2,
            },
            routing_key,
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            payload_encoding: "base64",
        }
    }
}

#[async_trait]
impl BrokerPublisher for HttpBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> OutboxResult<PublishAck> {
        let url = self.publish_url(exchange);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&Self::request_body(routing_key, payload))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OutboxError::Broker(format!("HTTP {}: {}", status, body)));
        }

        let result: PublishResponse = response.json().await?;
        debug!(url = %url, routing_key = %routing_key, routed = result.routed, "Published to broker");
        Ok(if result.routed {
            PublishAck::Ack
        } else {
            PublishAck::Nack
        })
    }
}

/// Scripted outcome for [`InMemoryBroker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOutcome {
    /// Record the message and ack it.
    Ack,
    /// Refuse the message.
    Nack,
    /// Fail as if the broker were unreachable.
    Fail,
    /// Never answer.
    Hang,
    /// Record the message, then never answer. Models a crash between
    /// delivery and acknowledgment.
    RecordThenHang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

type PublishHook = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct BrokerState {
    published: Vec<PublishedMessage>,
    script: VecDeque<BrokerOutcome>,
    fallback: Option<BrokerOutcome>,
    attempts: usize,
}

/// Broker double recording what it received. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    hook: Arc<Mutex<Option<PublishHook>>>,
}

impl InMemoryBroker {
    /// A broker that acks everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome used once the script is exhausted.
    pub fn set_default(&self, outcome: BrokerOutcome) {
        self.state.lock().fallback = Some(outcome);
    }

    /// Queue outcomes for the next publishes, in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = BrokerOutcome>) {
        self.state.lock().script.extend(outcomes);
    }

    /// Call `hook` with the number of recorded messages after each ack.
    pub fn on_ack(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.published().into_iter().map(|m| m.payload).collect()
    }

    /// Publish calls received, whatever their outcome.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }
}

#[async_trait]
impl BrokerPublisher for InMemoryBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> OutboxResult<PublishAck> {
        let message = PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        };

        let (outcome, recorded) = {
            let mut state = self.state.lock();
            state.attempts += 1;
            let outcome = state
                .script
                .pop_front()
                .or(state.fallback)
                .unwrap_or(BrokerOutcome::Ack);
            if matches!(outcome, BrokerOutcome::Ack | BrokerOutcome::RecordThenHang) {
                state.published.push(message);
            }
            (outcome, state.published.len())
        };

        match outcome {
            BrokerOutcome::Ack => {
                let hook = self.hook.lock().clone();
                if let Some(hook) = hook {
                    hook(recorded);
                }
                Ok(PublishAck::Ack)
            }
            BrokerOutcome::Nack => Ok(PublishAck::Nack),
            BrokerOutcome::Fail => Err(OutboxError::Broker("connection refused".into())),
            BrokerOutcome::Hang | BrokerOutcome::RecordThenHang => {
                std::future::pending::<()>().await;
                Ok(PublishAck::Nack)
            }
        }
    }
}
