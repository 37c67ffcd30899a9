//! Redis-backed lease store.
//!
//! The lease is a hash at `lease:<name>` with `holder` and `term` fields and a
//! millisecond TTL; the term counter lives at `lease:<name>:term` so it keeps
//! increasing after the lease key expires. Every operation is a single Lua
//! script, which makes acquire/renew/release atomic on the server.

use crate::{LeadershipLease, LeaseError, LeaseResult, LeaseStore};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use relay_core::SharedClock;
use std::time::Duration;
use tracing::debug;

const ACQUIRE_SCRIPT: &str = r#"
local holder = redis.call('HGET', KEYS[1], 'holder')
if holder == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return tonumber(redis.call('HGET', KEYS[1], 'term'))
end
if holder then
  return 0
end
local term = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'holder', ARGV[1], 'term', term)
redis.call('PEXPIRE', KEYS[1], ARGV[2])
return term
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'holder') == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return tonumber(redis.call('HGET', KEYS[1], 'term'))
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'holder') == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Lease store backed by a single Redis primary.
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: MultiplexedConnection,
    clock: SharedClock,
}

impl RedisLeaseStore {
    pub async fn connect(redis_url: &str, clock: SharedClock) -> LeaseResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::with_connection(conn, clock))
    }

    pub fn with_connection(conn: MultiplexedConnection, clock: SharedClock) -> Self {
        Self { conn, clock }
    }

    /// Key holding the lease hash.
    pub fn lease_key(name: &str) -> String {
        format!("lease:{}", name)
    }

    /// Key holding the monotonically increasing term counter.
    pub fn term_key(name: &str) -> String {
        format!("lease:{}:term", name)
    }

    /// Turn a script's term reply into a lease. The expiry is computed from
    /// the time sampled *before* the call, so the local view never outlives
    /// the server's.
    fn lease_from_term(
        holder_id: &str,
        term: u64,
        started_ms: u64,
        ttl: Duration,
    ) -> Option<LeadershipLease> {
        (term > 0).then(|| LeadershipLease {
            holder_id: holder_id.to_string(),
            term,
            expires_at_ms: started_ms.saturating_add(ttl.as_millis() as u64),
        })
    }

    async fn run_term_script(
        &self,
        source: &str,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> LeaseResult<Option<LeadershipLease>> {
        let started_ms = self.clock.now_ms();
        let mut conn = self.conn.clone();

        let term: u64 = Script::new(source)
            .key(Self::lease_key(name))
            .key(Self::term_key(name))
            .arg(holder_id)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        debug!(name = %name, holder = %holder_id, term, "Lease script completed");
        Ok(Self::lease_from_term(holder_id, term, started_ms, ttl))
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn try_acquire(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> LeaseResult<Option<LeadershipLease>> {
        self.run_term_script(ACQUIRE_SCRIPT, name, holder_id, ttl)
            .await
    }

    async fn renew(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> LeaseResult<Option<LeadershipLease>> {
        self.run_term_script(RENEW_SCRIPT, name, holder_id, ttl).await
    }

    async fn release(&self, name: &str, holder_id: &str) -> LeaseResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(Self::lease_key(name))
            .arg(holder_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn current(&self, name: &str) -> LeaseResult<Option<LeadershipLease>> {
        let now = self.clock.now_ms();
        let mut conn = self.conn.clone();
        let key = Self::lease_key(name);

        let (holder, term, pttl): (Option<String>, Option<u64>, i64) = redis::pipe()
            .hget(&key, "holder")
            .hget(&key, "term")
            .pttl(&key)
            .query_async(&mut conn)
            .await?;

        match (holder, term) {
            (Some(holder_id), Some(term)) if pttl > 0 => Ok(Some(LeadershipLease {
                holder_id,
                term,
                expires_at_ms: now.saturating_add(pttl as u64),
            })),
            (Some(holder_id), None) => Err(LeaseError::Malformed(format!(
                "{} held by {} has no term",
                key, holder_id
            ))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(RedisLeaseStore::lease_key("relay"), "lease:relay");
        assert_eq!(RedisLeaseStore::term_key("relay"), "lease:relay:term");
    }

    #[test]
    fn zero_term_means_not_granted() {
        assert!(RedisLeaseStore::lease_from_term("a", 0, 1_000, Duration::from_secs(5)).is_none());
    }

    #[test]
    fn expiry_is_measured_from_request_start() {
        let lease =
            RedisLeaseStore::lease_from_term("a", 7, 1_000, Duration::from_secs(5)).unwrap();
        assert_eq!(lease.term, 7);
        assert_eq!(lease.expires_at_ms, 6_000);
    }
}
