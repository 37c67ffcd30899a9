//! Transactional outbox and its relay.
//!
//! This crate provides:
//! - EventEnvelope: the immutable record written next to business state
//! - OutboxStore: durable FIFO list of serialized envelopes (memory, Redis)
//! - Notifier: best-effort wake-up broadcast for the relay
//! - BrokerPublisher: ack/nack publish interface (memory, Redis stream, HTTP)
//! - OutboxProducer: builds, appends and signals envelopes
//! - OutboxRelay: leader-only drain loop with at-least-once delivery

mod broker;
mod envelope;
mod error;
mod notify;
mod producer;
mod redis_store;
mod relay;
mod stats;
mod store;

#[cfg(test)]
mod tests;

pub use broker::{
    BrokerOutcome, BrokerPublisher, HttpBroker, InMemoryBroker, PublishAck, PublishedMessage,
    RedisStreamBroker,
};
pub use envelope::{EnvelopeMetadata, EventEnvelope, RequestContext};
pub use error::{OutboxError, OutboxResult};
pub use notify::{topic_for, InMemoryNotifier, Notifier, RedisNotifier};
pub use producer::{OutboxProducer, StagedEvent};
pub use redis_store::RedisOutboxStore;
pub use relay::{DrainReport, OutboxRelay, RelayOptions, StopReason};
pub use stats::{RelayStats, RelayStatsSnapshot};
pub use store::{InMemoryOutboxStore, OutboxStore, OutboxTransaction};
