use serde::{Deserialize, Serialize};

/// A time-bounded grant of leadership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipLease {
    /// Identity of the instance holding the lease.
    pub holder_id: String,
    /// Incremented every time the lease is freshly acquired.
    pub term: u64,
    /// Unix milliseconds after which the lease is forfeited.
    pub expires_at_ms: u64,
}

impl LeadershipLease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    pub fn is_held_by(&self, holder_id: &str) -> bool {
        self.holder_id == holder_id
    }
}
