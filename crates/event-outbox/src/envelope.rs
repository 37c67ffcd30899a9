//! Event envelope written to the outbox.

use crate::{OutboxError, OutboxResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-request values carried into event metadata.
///
/// Passed explicitly down to envelope construction; there is no ambient
/// request-scoped storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Caller identity, e.g. the request's user agent.
    pub origin: Option<String>,
}

impl RequestContext {
    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// Unique per envelope; consumers de-duplicate on it.
    pub id: Uuid,
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Unix seconds at enqueue time.
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// An event as stored in the outbox and published to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub metadata: EnvelopeMetadata,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Value,
        subject_id: Option<String>,
        ctx: &RequestContext,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata: EnvelopeMetadata {
                id: Uuid::new_v4(),
                subject_id,
                time: chrono::Utc::now().timestamp(),
                origin: ctx.origin.clone(),
            },
        }
    }

    /// Routing key used when publishing.
    pub fn routing_key(&self) -> &str {
        &self.event_type
    }

    pub fn to_bytes(&self) -> OutboxResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a stored entry. Any failure is reported as [`OutboxError::Corrupt`].
    pub fn from_bytes(bytes: &[u8]) -> OutboxResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| OutboxError::Corrupt(e.to_string()))
    }
}
