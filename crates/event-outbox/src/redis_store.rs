//! Redis list outbox.
//!
//! `RPUSH` appends at the tail, `LINDEX 0` peeks the head and `LREM key 1`
//! removes the first matching value, which is the entry that was peeked.

use crate::{OutboxResult, OutboxStore};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Pipeline};
use tracing::warn;

fn quarantine_key_for(outbox_key: &str) -> String {
    format!("{}:quarantine", outbox_key)
}

/// Outbox stored in a Redis list.
#[derive(Clone)]
pub struct RedisOutboxStore {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisOutboxStore {
    pub async fn connect(redis_url: &str, key: impl Into<String>) -> OutboxResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::with_connection(conn, key))
    }

    pub fn with_connection(conn: MultiplexedConnection, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn quarantine_key(&self) -> String {
        quarantine_key_for(&self.key)
    }

    /// Add the append to a caller-owned pipeline so it commits together with
    /// the caller's own writes (use `pipe.atomic()` for `MULTI`/`EXEC`).
    pub fn stage_append(&self, pipe: &mut Pipeline, entry: &[u8]) {
        pipe.rpush(&self.key, entry).ignore();
    }
}

#[async_trait]
impl OutboxStore for RedisOutboxStore {
    async fn append(&self, entry: &[u8]) -> OutboxResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.rpush(&self.key, entry).await?;
        Ok(len)
    }

    async fn peek_oldest(&self) -> OutboxResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let head: Option<Vec<u8>> = conn.lindex(&self.key, 0).await?;
        Ok(head)
    }

    async fn remove_one(&self, entry: &[u8]) -> OutboxResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.lrem(&self.key, 1, entry).await?;
        Ok(removed > 0)
    }

    async fn quarantine(&self, entry: &[u8]) -> OutboxResult<()> {
        let mut conn = self.conn.clone();
        let quarantine_key = self.quarantine_key();

        let (_, removed): (u64, i64) = redis::pipe()
            .atomic()
            .rpush(&quarantine_key, entry)
            .lrem(&self.key, 1, entry)
            .query_async(&mut conn)
            .await?;

        if removed == 0 {
            warn!(key = %self.key, "Quarantined entry was no longer in the outbox");
        }
        Ok(())
    }

    async fn len(&self) -> OutboxResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(&self.key).await?;
        Ok(len)
    }
}
