//! Redis cache provider implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tracing::debug;

use texhub_core::error::{AppError, ErrorKind};
use texhub_core::result::AppResult;
use texhub_core::traits::cache::{CacheProvider, CacheWrite};

use super::client::RedisClient;

/// Delete KEYS[1] only while it holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Overwrite KEYS[1] with ARGV[2] (PX ARGV[3]) only while it holds ARGV[1].
const COMPARE_AND_SET: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
    return 1
end
return 0
"#;

/// Redis-backed cache provider.
#[derive(Debug, Clone)]
pub struct RedisCacheProvider {
    /// Redis client.
    client: RedisClient,
}

impl RedisCacheProvider {
    /// Create a new Redis cache provider.
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    /// Access the underlying client.
    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    /// Map a Redis error to an AppError.
    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Cache, format!("Redis error: {e}"), e)
    }
}

/// Redis rejects `PX 0`; round sub-millisecond TTLs up.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CacheProvider for RedisCacheProvider {
    async fn get_many(&self, keys: &[String]) -> AppResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.client.key(k)).collect();
        let mut conn = self.client.connection();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&full_keys)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(values)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let full_key = self.client.key(key);
        let mut conn = self.client.connection();

        // SET key value PX ttl NX
        let result: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(result.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> AppResult<bool> {
        let full_key = self.client.key(key);
        let mut conn = self.client.connection();
        let deleted: i64 = Script::new(COMPARE_AND_DELETE)
            .key(&full_key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(deleted == 1)
    }

    async fn write_batch(&self, writes: &[CacheWrite]) -> AppResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for write in writes {
            match write {
                CacheWrite::Set { key, value, ttl } => {
                    pipe.cmd("SET")
                        .arg(self.client.key(key))
                        .arg(value)
                        .arg("PX")
                        .arg(ttl_millis(*ttl))
                        .ignore();
                }
                CacheWrite::SetIfAbsent { key, value, ttl } => {
                    pipe.cmd("SET")
                        .arg(self.client.key(key))
                        .arg(value)
                        .arg("PX")
                        .arg(ttl_millis(*ttl))
                        .arg("NX")
                        .ignore();
                }
                CacheWrite::CompareAndSet {
                    key,
                    expected,
                    value,
                    ttl,
                } => {
                    pipe.cmd("EVAL")
                        .arg(COMPARE_AND_SET)
                        .arg(1)
                        .arg(self.client.key(key))
                        .arg(expected)
                        .arg(value)
                        .arg(ttl_millis(*ttl))
                        .ignore();
                }
            }
        }
        let mut conn = self.client.connection();
        let _: () = pipe.query_async(&mut conn).await.map_err(Self::map_err)?;
        debug!(count = writes.len(), "Executed cache write batch");
        Ok(())
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> AppResult<()> {
        let full_key = self.client.key(key);
        let mut conn = self.client.connection();
        let _: () = redis::pipe()
            .hset(&full_key, field, value)
            .ignore()
            .pexpire(&full_key, ttl_millis(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> AppResult<()> {
        let full_key = self.client.key(key);
        let mut conn = self.client.connection();
        let _: () = conn.hdel(&full_key, field).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> AppResult<Vec<(String, String)>> {
        let full_key = self.client.key(key);
        let mut conn = self.client.connection();
        let fields: HashMap<String, String> =
            conn.hgetall(&full_key).await.map_err(Self::map_err)?;
        Ok(fields.into_iter().collect())
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.connection();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }
}
