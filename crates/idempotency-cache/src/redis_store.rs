//! Redis idempotency store.
//!
//! Records are JSON strings at `idempotency:<key>` with a millisecond TTL set
//! once at insertion. Completion and abandonment compare the stored value
//! with the pending marker the caller placed, so a marker that expired and
//! was replaced by another request is never touched.

use crate::{BeginOutcome, IdempotencyRecord, IdempotencyResult, IdempotencyStore};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use relay_core::SharedClock;

// Returns nil when inserted, otherwise the existing value.
const BEGIN_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
  return false
end
return redis.call('GET', KEYS[1])
"#;

const COMPLETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
  return 1
end
return 0
"#;

const ABANDON_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub(crate) fn record_key(key: &str) -> String {
    format!("idempotency:{}", key)
}

/// Store shared by every instance through Redis.
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    conn: MultiplexedConnection,
    clock: SharedClock,
}

impl RedisIdempotencyStore {
    pub async fn connect(redis_url: &str, clock: SharedClock) -> IdempotencyResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn, clock })
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn begin(&self, pending: &IdempotencyRecord) -> IdempotencyResult<BeginOutcome> {
        let ttl_ms = pending
            .expires_at_ms
            .saturating_sub(self.clock.now_ms())
            .max(1);
        let mut conn = self.conn.clone();

        let existing: Option<String> = Script::new(BEGIN_SCRIPT)
            .key(record_key(&pending.key))
            .arg(serde_json::to_string(pending)?)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        match existing {
            None => Ok(BeginOutcome::Started),
            Some(json) => Ok(BeginOutcome::Existing(serde_json::from_str(&json)?)),
        }
    }

    async fn complete(
        &self,
        pending: &IdempotencyRecord,
        completed: &IdempotencyRecord,
    ) -> IdempotencyResult<bool> {
        let mut conn = self.conn.clone();
        let replaced: i64 = Script::new(COMPLETE_SCRIPT)
            .key(record_key(&pending.key))
            .arg(serde_json::to_string(pending)?)
            .arg(serde_json::to_string(completed)?)
            .invoke_async(&mut conn)
            .await?;
        Ok(replaced == 1)
    }

    async fn abandon(&self, pending: &IdempotencyRecord) -> IdempotencyResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(ABANDON_SCRIPT)
            .key(record_key(&pending.key))
            .arg(serde_json::to_string(pending)?)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn get(&self, key: &str) -> IdempotencyResult<Option<IdempotencyRecord>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(record_key(key)).await?;
        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(Into::into)
    }
}
