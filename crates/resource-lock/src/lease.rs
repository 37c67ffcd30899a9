use uuid::Uuid;

/// A granted lock over a set of resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    /// Sorted, de-duplicated resource names held together.
    pub resources: Vec<String>,
    /// Ownership proof for extend and release.
    pub token: Uuid,
    /// Increases with every grant; protected resources can reject lower values.
    pub fence: u64,
    /// Unix milliseconds after which the lease must not be relied on.
    pub expires_at_ms: u64,
}

impl LockLease {
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms)
    }
}

/// Sort and de-duplicate resource names so every caller locks in one order.
pub(crate) fn normalize(resources: &[&str]) -> Vec<String> {
    let mut names: Vec<String> = resources.iter().map(|r| r.to_string()).collect();
    names.sort();
    names.dedup();
    names
}
