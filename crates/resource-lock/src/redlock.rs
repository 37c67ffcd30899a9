//! Quorum lock over independent Redis nodes.
//!
//! Each node holds `lock:<resource>` keys set to the lease token with a
//! millisecond TTL, plus a `lockfence:counter` counter. A lease is granted when a
//! majority of nodes accepted it and time remains after subtracting the
//! acquisition time and a clock drift allowance.

use crate::{LockBackend, LockError, LockLease, LockResult};
use async_trait::async_trait;
use futures_util::future::join_all;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult, Script};
use relay_core::SharedClock;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

// Outside the `lock:` namespace so no resource name can collide with it.
const FENCE_KEY: &str = "lockfence:counter";

/// Share of the TTL reserved for clock drift between nodes.
const DRIFT_FACTOR: f64 = 0.01;
const DRIFT_FLOOR_MS: u64 = 2;

// KEYS[1..n-1] are resources, KEYS[n] is the fence counter.
// Returns the new fence, or -i when KEYS[i] is already held.
const ACQUIRE_SCRIPT: &str = r#"
local n = #KEYS - 1
for i = 1, n do
  if redis.call('EXISTS', KEYS[i]) == 1 then
    return -i
  end
end
for i = 1, n do
  redis.call('SET', KEYS[i], ARGV[1], 'PX', ARGV[2])
end
return redis.call('INCR', KEYS[#KEYS])
"#;

const EXTEND_SCRIPT: &str = r#"
for i = 1, #KEYS do
  if redis.call('GET', KEYS[i]) ~= ARGV[1] then
    return 0
  end
end
for i = 1, #KEYS do
  redis.call('PEXPIRE', KEYS[i], ARGV[2])
end
return 1
"#;

const RELEASE_SCRIPT: &str = r#"
local released = 0
for i = 1, #KEYS do
  if redis.call('GET', KEYS[i]) == ARGV[1] then
    released = released + redis.call('DEL', KEYS[i])
  end
end
return released
"#;

pub(crate) fn lock_key(resource: &str) -> String {
    format!("lock:{}", resource)
}

pub(crate) fn quorum(nodes: usize) -> usize {
    nodes / 2 + 1
}

/// Time a fresh grant can be relied on, or `None` if it already ran out.
pub(crate) fn validity_ms(ttl: Duration, elapsed_ms: u64) -> Option<u64> {
    let ttl_ms = ttl.as_millis() as u64;
    let drift = ((ttl_ms as f64) * DRIFT_FACTOR) as u64 + DRIFT_FLOOR_MS;
    ttl_ms
        .checked_sub(elapsed_ms)
        .and_then(|left| left.checked_sub(drift))
        .filter(|left| *left > 0)
}

enum NodeReply {
    Granted(u64),
    Busy(usize),
    Failed,
}

/// Lock backend spreading each lease over a majority of Redis nodes.
pub struct RedisLockBackend {
    nodes: Vec<MultiplexedConnection>,
    clock: SharedClock,
}

impl RedisLockBackend {
    pub async fn connect(node_urls: &[String], clock: SharedClock) -> LockResult<Self> {
        let mut nodes = Vec::with_capacity(node_urls.len());
        for url in node_urls {
            let client = Client::open(url.as_str())?;
            nodes.push(client.get_multiplexed_async_connection().await?);
        }
        if nodes.is_empty() {
            return Err(LockError::Unavailable("no lock nodes configured".into()));
        }
        Ok(Self { nodes, clock })
    }

    fn quorum(&self) -> usize {
        quorum(self.nodes.len())
    }

    async fn run_on_all(
        &self,
        source: &'static str,
        keys: &[String],
        token: Uuid,
        ttl_ms: Option<u64>,
    ) -> Vec<RedisResult<i64>> {
        let calls = self.nodes.iter().map(|node| {
            let mut conn = node.clone();
            async move {
                let script = Script::new(source);
                let mut invocation = script.prepare_invoke();
                for key in keys {
                    invocation.key(key);
                }
                invocation.arg(token.to_string());
                if let Some(ttl_ms) = ttl_ms {
                    invocation.arg(ttl_ms);
                }
                let reply: RedisResult<i64> = invocation.invoke_async(&mut conn).await;
                reply
            }
        });
        join_all(calls).await
    }

    async fn release_token(&self, resources: &[String], token: Uuid) {
        let keys: Vec<String> = resources.iter().map(|r| lock_key(r)).collect();
        for reply in self.run_on_all(RELEASE_SCRIPT, &keys, token, None).await {
            if let Err(e) = reply {
                warn!(token = %token, error = %e, "Lock release failed on a node");
            }
        }
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn acquire(&self, resources: &[String], ttl: Duration) -> LockResult<LockLease> {
        let token = Uuid::new_v4();
        let started_ms = self.clock.now_ms();

        let mut keys: Vec<String> = resources.iter().map(|r| lock_key(r)).collect();
        keys.push(FENCE_KEY.to_string());

        let replies = self
            .run_on_all(ACQUIRE_SCRIPT, &keys, token, Some(ttl.as_millis() as u64))
            .await;

        let mut granted = 0;
        let mut fence = 0;
        let mut busy: Vec<String> = Vec::new();
        for reply in replies {
            let reply = match reply {
                Ok(value) if value > 0 => NodeReply::Granted(value as u64),
                Ok(value) if value < 0 => NodeReply::Busy((-value) as usize - 1),
                Ok(_) => NodeReply::Failed,
                Err(e) => {
                    warn!(error = %e, "Lock node unreachable during acquire");
                    NodeReply::Failed
                }
            };
            match reply {
                NodeReply::Granted(node_fence) => {
                    granted += 1;
                    fence = fence.max(node_fence);
                }
                NodeReply::Busy(index) => {
                    if let Some(resource) = resources.get(index) {
                        if !busy.contains(resource) {
                            busy.push(resource.clone());
                        }
                    }
                }
                NodeReply::Failed => {}
            }
        }

        let elapsed_ms = self.clock.now_ms().saturating_sub(started_ms);
        let validity = validity_ms(ttl, elapsed_ms);

        if let (true, Some(validity)) = (granted >= self.quorum(), validity) {
            debug!(resources = ?resources, fence, granted, "Lock acquired");
            return Ok(LockLease {
                resources: resources.to_vec(),
                token,
                fence,
                expires_at_ms: started_ms.saturating_add(validity),
            });
        }

        // Undo partial grants so a minority never blocks the next caller.
        self.release_token(resources, token).await;

        if busy.is_empty() {
            Err(LockError::Unavailable(format!(
                "{} of {} nodes granted, {} required",
                granted,
                self.nodes.len(),
                self.quorum()
            )))
        } else {
            Err(LockError::Locked { resources: busy })
        }
    }

    async fn extend(&self, lease: &LockLease, ttl: Duration) -> LockResult<LockLease> {
        let started_ms = self.clock.now_ms();
        let keys: Vec<String> = lease.resources.iter().map(|r| lock_key(r)).collect();

        let replies = self
            .run_on_all(EXTEND_SCRIPT, &keys, lease.token, Some(ttl.as_millis() as u64))
            .await;
        let extended = replies.iter().filter(|r| matches!(r, Ok(1))).count();

        let elapsed_ms = self.clock.now_ms().saturating_sub(started_ms);
        match validity_ms(ttl, elapsed_ms) {
            Some(validity) if extended >= self.quorum() => Ok(LockLease {
                expires_at_ms: started_ms.saturating_add(validity),
                ..lease.clone()
            }),
            _ => Err(LockError::Lost(format!(
                "{} of {} nodes extended lease {}",
                extended,
                self.nodes.len(),
                lease.token
            ))),
        }
    }

    async fn release(&self, lease: &LockLease) -> LockResult<()> {
        self.release_token(&lease.resources, lease.token).await;
        Ok(())
    }
}
