//! Relay drain loop.
//!
//! Runs on every instance but only drains while its [`LeaderHandle`] reports
//! a live lease. Leadership is re-checked before every entry, so a demotion
//! stops the loop after at most one in-flight publish.
//!
//! Wake sources while leading: a notification, the fallback timer, and any
//! leadership status change (which includes the moment of election).

use crate::{
    BrokerPublisher, EventEnvelope, Notifier, OutboxError, OutboxResult, OutboxStore, PublishAck,
    RelayStats,
};
use leader_lease::LeaderHandle;
use relay_core::RelayConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Drain loop settings.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Exchange every envelope is published to.
    pub exchange: String,
    /// Poll period covering lost notifications.
    pub fallback_poll: Duration,
    /// A publish with no answer by then counts as a nack.
    pub publish_timeout: Duration,
    /// Bound on each outbox store call.
    pub store_timeout: Duration,
}

impl RelayOptions {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            fallback_poll: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_secs(2),
        }
    }

    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            exchange: config.exchange_name.clone(),
            fallback_poll: config.fallback_poll(),
            publish_timeout: config.publish_timeout(),
            store_timeout: config.store_timeout(),
        }
    }

    pub fn with_fallback_poll(mut self, poll: Duration) -> Self {
        self.fallback_poll = poll;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}

/// Why a drain pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The outbox is empty.
    Empty,
    /// This instance is not (or no longer) the leader.
    NotLeader,
    /// The broker nacked, failed or timed out; the head entry stays.
    PublishFailed,
    /// The outbox store could not be read or written.
    StoreFailed,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub published: usize,
    pub quarantined: usize,
    pub stop: StopReason,
}

enum Delivery {
    Acked,
    Failed(OutboxError),
    Refused,
}

/// Wait for the next signal, or forever once the subscription is gone.
async fn next_signal(signals: &mut Option<mpsc::Receiver<()>>) {
    let Some(rx) = signals.as_mut() else {
        return std::future::pending().await;
    };
    if rx.recv().await.is_none() {
        warn!("Outbox notifications lost; relying on the fallback poll");
        *signals = None;
        std::future::pending::<()>().await;
    }
}

/// Leader-only relay from the outbox to the broker.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    notifier: Arc<dyn Notifier>,
    broker: Arc<dyn BrokerPublisher>,
    leader: LeaderHandle,
    options: RelayOptions,
    stats: Arc<RelayStats>,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        notifier: Arc<dyn Notifier>,
        broker: Arc<dyn BrokerPublisher>,
        leader: LeaderHandle,
        options: RelayOptions,
    ) -> Self {
        Self {
            store,
            notifier,
            broker,
            leader,
            options,
            stats: Arc::new(RelayStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Publish entries oldest-first until the outbox is empty, a publish
    /// fails, or leadership is gone.
    pub async fn drain_pass(&self) -> DrainReport {
        self.stats.record_pass();
        let mut report = DrainReport {
            published: 0,
            quarantined: 0,
            stop: StopReason::Empty,
        };

        loop {
            if !self.leader.is_leader() {
                report.stop = StopReason::NotLeader;
                break;
            }

            let entry = match self.bounded(self.store.peek_oldest()).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    report.stop = StopReason::Empty;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read outbox head");
                    report.stop = StopReason::StoreFailed;
                    break;
                }
            };

            let envelope = match EventEnvelope::from_bytes(&entry) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(error = %e, bytes = entry.len(), "Quarantining undecodable outbox entry");
                    if let Err(e) = self.bounded(self.store.quarantine(&entry)).await {
                        warn!(error = %e, "Failed to quarantine outbox entry");
                        report.stop = StopReason::StoreFailed;
                        break;
                    }
                    self.stats.record_quarantined();
                    report.quarantined += 1;
                    continue;
                }
            };

            match self.deliver(&envelope, &entry).await {
                Delivery::Acked => {}
                Delivery::Refused => {
                    self.stats.record_publish_failure();
                    warn!(event_id = %envelope.metadata.id, "Broker nacked event; will retry");
                    report.stop = StopReason::PublishFailed;
                    break;
                }
                Delivery::Failed(e) => {
                    self.stats.record_publish_failure();
                    warn!(event_id = %envelope.metadata.id, error = %e, "Publish failed; will retry");
                    report.stop = StopReason::PublishFailed;
                    break;
                }
            }

            match self.bounded(self.store.remove_one(&entry)).await {
                Ok(removed) => {
                    if !removed {
                        debug!(event_id = %envelope.metadata.id, "Entry already gone after ack");
                    }
                    self.stats.record_published();
                    report.published += 1;
                }
                Err(e) => {
                    // Left in place, so it is republished later: a duplicate, never a gap.
                    warn!(event_id = %envelope.metadata.id, error = %e, "Failed to remove acked entry");
                    report.stop = StopReason::StoreFailed;
                    break;
                }
            }
        }

        if report.published > 0 || report.quarantined > 0 {
            let stats = self.stats.snapshot();
            info!(
                published = report.published,
                quarantined = report.quarantined,
                stop = ?report.stop,
                total_published = stats.published,
                total_failures = stats.publish_failures,
                "Drain pass finished"
            );
        }
        report
    }

    /// Run a store call, failing it once `store_timeout` passes.
    async fn bounded<T>(&self, call: impl Future<Output = OutboxResult<T>>) -> OutboxResult<T> {
        let timeout = self.options.store_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(OutboxError::Storage(format!(
                    "no answer within {} ms",
                    timeout.as_millis()
                )))
            })
    }

    async fn deliver(&self, envelope: &EventEnvelope, entry: &[u8]) -> Delivery {
        let publish = self
            .broker
            .publish(&self.options.exchange, envelope.routing_key(), entry);

        match tokio::time::timeout(self.options.publish_timeout, publish).await {
            Ok(Ok(PublishAck::Ack)) => {
                debug!(
                    event_id = %envelope.metadata.id,
                    event_type = %envelope.event_type,
                    "Event published"
                );
                Delivery::Acked
            }
            Ok(Ok(PublishAck::Nack)) => Delivery::Refused,
            Ok(Err(e)) => Delivery::Failed(e),
            Err(_) => Delivery::Failed(OutboxError::Timeout(
                self.options.publish_timeout.as_millis() as u64,
            )),
        }
    }

    /// Drain on every wake while leader. Returns when leadership is lost,
    /// shutdown is requested, or the election goes away.
    async fn drain_while_leader(
        &self,
        signals: &mut Option<mpsc::Receiver<()>>,
        leader: &mut LeaderHandle,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let term = leader.status().term;
        info!(term = ?term, "Relay draining as leader");

        loop {
            if !leader.is_leader() {
                info!(term = ?term, "Relay stopped draining: no longer leader");
                return true;
            }

            let stop = self.drain_pass().await.stop;
            if stop == StopReason::NotLeader {
                continue;
            }
            // After a failure only the timer retries, so signals cannot hammer the broker.
            let backing_off = matches!(stop, StopReason::PublishFailed | StopReason::StoreFailed);

            tokio::select! {
                _ = next_signal(signals), if !backing_off => {
                    debug!("Woken by notification");
                }
                _ = tokio::time::sleep(self.options.fallback_poll) => {}
                changed = leader.changed() => {
                    if !changed {
                        return false;
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut signals = match self.bounded(self.notifier.observe()).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(error = %e, "Could not subscribe to outbox notifications; polling only");
                None
            }
        };
        let mut leader = self.leader.clone();

        info!(
            exchange = %self.options.exchange,
            fallback_poll_ms = self.options.fallback_poll.as_millis() as u64,
            "Outbox relay started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if leader.is_leader() {
                if !self
                    .drain_while_leader(&mut signals, &mut leader, &mut shutdown)
                    .await
                {
                    break;
                }
                continue;
            }

            tokio::select! {
                changed = leader.changed() => {
                    if !changed {
                        break;
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                // Followers consume signals so a stale one does not fire on election.
                _ = next_signal(&mut signals) => {}
                _ = tokio::time::sleep(self.options.fallback_poll) => {}
            }
        }

        let stats = self.stats.snapshot();
        info!(
            published = stats.published,
            publish_failures = stats.publish_failures,
            quarantined = stats.quarantined,
            drain_passes = stats.drain_passes,
            "Outbox relay stopped"
        );
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
