//! Redis-backed store.
//!
//! One multiplexed connection is opened by [`RedisStore::connect`] and shared
//! by every clone of the store; commands are pipelined over it. Call
//! [`RedisStore::close`] (or drop the last clone) to tear it down.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::num::NonZeroUsize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use super::{KvStore, StoreError, StoreResult};

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Sets the expiry of KEYS[1] to ARGV[2] ms only while it still holds ARGV[1].
const COMPARE_AND_EXPIRE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

fn compare_and_delete_script() -> &'static Script {
    static SCRIPT: OnceLock<Script> = OnceLock::new();
    SCRIPT.get_or_init(|| Script::new(COMPARE_AND_DELETE))
}

fn compare_and_expire_script() -> &'static Script {
    static SCRIPT: OnceLock<Script> = OnceLock::new();
    SCRIPT.get_or_init(|| Script::new(COMPARE_AND_EXPIRE))
}

pub(crate) fn store_err(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry.
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Open the shared connection and verify it with a PING.
    pub async fn connect(connection_url: &str) -> StoreResult<Self> {
        let client =
            redis::Client::open(connection_url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_err)?;
        let store = Self { client, conn };
        store.ping().await?;
        debug!(url = %connection_url, "redis store connected");
        Ok(store)
    }

    /// The underlying client, for opening dedicated pub/sub connections.
    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    /// Release the shared connection.
    pub fn close(self) {
        debug!("redis store closed");
        drop(self.conn);
    }

    pub(crate) fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        conn.get(key).await.map_err(store_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: usize = conn.del(key).await.map_err(store_err)?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = compare_and_delete_script()
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(removed == 1)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn();
        let updated: i64 = compare_and_expire_script()
            .key(key)
            .arg(expected)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(updated == 1)
    }

    async fn push_capped(
        &self,
        key: &str,
        value: &str,
        cap: usize,
        ttl: Duration,
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let keep_from = -(isize::try_from(cap.max(1)).unwrap_or(isize::MAX));
        let _: () = redis::pipe()
            .atomic()
            .rpush(key, value)
            .ignore()
            .ltrim(key, keep_from, -1)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn list(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        conn.lrange(key, 0, -1).await.map_err(store_err)
    }

    async fn push_back(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: usize = conn.rpush(key, value).await.map_err(store_err)?;
        Ok(())
    }

    async fn pop_front(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        conn.lpop(key, None::<NonZeroUsize>)
            .await
            .map_err(store_err)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
