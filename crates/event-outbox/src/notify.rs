//! Wake-up notifications for the relay.
//!
//! A signal only hints that new work may exist. Delivery is not guaranteed,
//! so the relay also polls on a fallback timer. Signals coalesce: a
//! subscriber that has not consumed the previous one does not queue another.

use crate::OutboxResult;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Pub/sub topic for an exchange.
pub fn topic_for(exchange: &str) -> String {
    format!("{}.outbox", exchange)
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fire-and-forget broadcast to every observer, on every instance.
    async fn signal(&self) -> OutboxResult<()>;

    /// Subscribe. The receiver closes if the subscription is lost.
    async fn observe(&self) -> OutboxResult<mpsc::Receiver<()>>;
}

/// Forward one signal without ever blocking. Returns `false` once the
/// receiving side is gone.
fn forward(tx: &mpsc::Sender<()>) -> bool {
    !matches!(tx.try_send(()), Err(TrySendError::Closed(_)))
}

/// Notifier for instances living in one process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<()>>>>,
    drop_signals: Arc<AtomicBool>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Silently lose every signal from now on.
    pub fn set_drop_signals(&self, drop: bool) {
        self.drop_signals.store(drop, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn signal(&self) -> OutboxResult<()> {
        if self.drop_signals.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.subscribers.lock().retain(forward);
        Ok(())
    }

    async fn observe(&self) -> OutboxResult<mpsc::Receiver<()>> {
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.lock().push(tx);
        Ok(rx)
    }
}

/// Notifier over Redis pub/sub.
#[derive(Clone)]
pub struct RedisNotifier {
    client: Client,
    conn: MultiplexedConnection,
    topic: String,
}

impl RedisNotifier {
    pub async fn connect(redis_url: &str, exchange: &str) -> OutboxResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            conn,
            topic: topic_for(exchange),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn signal(&self) -> OutboxResult<()> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.topic, 1).await?;
        debug!(topic = %self.topic, receivers, "Signalled outbox");
        Ok(())
    }

    async fn observe(&self) -> OutboxResult<mpsc::Receiver<()>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.topic).await?;

        let (tx, rx) = mpsc::channel(1);
        let topic = self.topic.clone();
        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            while messages.next().await.is_some() {
                if !forward(&tx) {
                    break;
                }
            }
            warn!(topic = %topic, "Outbox subscription ended");
        });

        Ok(rx)
    }
}
