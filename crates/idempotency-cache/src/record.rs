use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Hash identifying a request: SHA-256 over the path and body, hex encoded.
pub fn request_hash(path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordStatus {
    /// The guarded request is still running.
    Pending,
    /// Final outcome; immutable until the record expires.
    Completed {
        status_code: u16,
        body: serde_json::Value,
        completed_at_ms: u64,
    },
}

/// Memo of one idempotent request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub status: RecordStatus,
    pub created_at_ms: u64,
    /// Fixed at creation; completing does not extend it.
    pub expires_at_ms: u64,
}

impl IdempotencyRecord {
    pub fn pending(key: &str, request_hash: &str, now_ms: u64, ttl_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            request_hash: request_hash.to_string(),
            status: RecordStatus::Pending,
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        }
    }

    pub fn completed(&self, status_code: u16, body: serde_json::Value, now_ms: u64) -> Self {
        Self {
            status: RecordStatus::Completed {
                status_code,
                body,
                completed_at_ms: now_ms,
            },
            ..self.clone()
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_depends_on_path_and_body() {
        let a = request_hash("/trades", br#"{"offer":1}"#);
        assert_eq!(a.len(), 64);
        assert_eq!(a, request_hash("/trades", br#"{"offer":1}"#));
        assert_ne!(a, request_hash("/trades", br#"{"offer":2}"#));
        assert_ne!(a, request_hash("/offers", br#"{"offer":1}"#));
    }

    #[test]
    fn completing_keeps_identity_and_expiry() {
        let pending = IdempotencyRecord::pending("k", "h", 1_000, 3_600_000);
        let done = pending.completed(201, serde_json::json!({ "id": 7 }), 1_500);

        assert_eq!(done.key, "k");
        assert_eq!(done.created_at_ms, 1_000);
        assert_eq!(done.expires_at_ms, 3_601_000);
        assert!(matches!(done.status, RecordStatus::Completed { status_code: 201, .. }));
    }
}
