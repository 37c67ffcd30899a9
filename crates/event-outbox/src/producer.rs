//! Enqueue side of the outbox.

use crate::{EventEnvelope, Notifier, OutboxResult, OutboxStore, RequestContext};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// An envelope serialized and ready to join a caller's atomic unit.
#[derive(Debug, Clone)]
pub struct StagedEvent {
    pub envelope: EventEnvelope,
    pub bytes: Vec<u8>,
}

/// Builds envelopes, appends them and wakes the relay.
#[derive(Clone)]
pub struct OutboxProducer {
    store: Arc<dyn OutboxStore>,
    notifier: Arc<dyn Notifier>,
}

impl OutboxProducer {
    pub fn new(store: Arc<dyn OutboxStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Build and serialize an envelope without writing it anywhere.
    pub fn stage<T: Serialize>(
        &self,
        event_type: &str,
        data: &T,
        subject_id: Option<&str>,
        ctx: &RequestContext,
    ) -> OutboxResult<StagedEvent> {
        let envelope = EventEnvelope::new(
            event_type,
            serde_json::to_value(data)?,
            subject_id.map(str::to_string),
            ctx,
        );
        let bytes = envelope.to_bytes()?;
        Ok(StagedEvent { envelope, bytes })
    }

    /// Append one event on its own and signal the relay.
    pub async fn enqueue<T: Serialize>(
        &self,
        event_type: &str,
        data: &T,
        subject_id: Option<&str>,
        ctx: &RequestContext,
    ) -> OutboxResult<EventEnvelope> {
        let staged = self.stage(event_type, data, subject_id, ctx)?;
        let position = self.store.append(&staged.bytes).await?;

        debug!(
            event_type = %event_type,
            event_id = %staged.envelope.metadata.id,
            position,
            "Enqueued event"
        );

        self.notify().await;
        Ok(staged.envelope)
    }

    /// Wake the relay after a commit. A lost signal is covered by the
    /// relay's fallback poll, so failures are only logged.
    pub async fn notify(&self) {
        if let Err(e) = self.notifier.signal().await {
            warn!(error = %e, "Failed to signal outbox relay");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryNotifier, InMemoryOutboxStore};
    use serde_json::json;

    fn producer() -> (OutboxProducer, InMemoryOutboxStore, InMemoryNotifier) {
        let store = InMemoryOutboxStore::new();
        let notifier = InMemoryNotifier::new();
        let producer = OutboxProducer::new(Arc::new(store.clone()), Arc::new(notifier.clone()));
        (producer, store, notifier)
    }

    #[tokio::test]
    async fn enqueue_appends_and_signals() {
        let (producer, store, notifier) = producer();
        let mut wake = notifier.observe().await.unwrap();

        let envelope = producer
            .enqueue("inventory.changed", &json!({ "items": 3 }), Some("acct:1"), &RequestContext::default())
            .await
            .unwrap();

        let stored = EventEnvelope::from_bytes(&store.entries()[0]).unwrap();
        assert_eq!(stored, envelope);
        assert!(wake.try_recv().is_ok());
    }

    #[tokio::test]
    async fn staged_event_joins_caller_unit() {
        let (producer, store, _) = producer();
        let ctx = RequestContext::with_origin("steam-client");

        let staged = producer
            .stage("trade.sent", &json!({ "offerId": 9 }), Some("acct:9"), &ctx)
            .unwrap();
        assert_eq!(staged.envelope.metadata.origin.as_deref(), Some("steam-client"));

        store
            .atomically(|tx| {
                tx.append(staged.bytes.clone());
                Ok::<_, ()>(())
            })
            .unwrap();
        producer.notify().await;

        assert_eq!(store.entries(), vec![staged.bytes]);
    }

    #[tokio::test]
    async fn storage_failure_is_returned() {
        let (producer, store, _) = producer();
        store.set_unavailable(true);
        assert!(producer
            .enqueue("x", &json!({}), None, &RequestContext::default())
            .await
            .is_err());
    }
}
