//! Cache provider trait for the coordination primitives.

use std::time::Duration;

use async_trait::async_trait;

use crate::result::AppResult;

/// A single deferred write, executed as part of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    /// `SET key value PX ttl`: unconditional overwrite.
    Set {
        /// Full key.
        key: String,
        /// Value.
        value: String,
        /// Time-to-live.
        ttl: Duration,
    },
    /// `SET key value NX PX ttl`: only when the key is absent.
    SetIfAbsent {
        /// Full key.
        key: String,
        /// Value.
        value: String,
        /// Time-to-live.
        ttl: Duration,
    },
    /// Overwrite only while the key still holds `expected`.
    CompareAndSet {
        /// Full key.
        key: String,
        /// Value the key must currently hold.
        expected: String,
        /// Replacement value.
        value: String,
        /// Time-to-live.
        ttl: Duration,
    },
}

/// Trait for the shared key-value store (Redis, or in-memory for tests).
///
/// Keys are passed fully built (see the key builders in `texhub-cache`); the
/// provider is only responsible for its own configured prefix and for TTL
/// enforcement.
#[async_trait]
pub trait CacheProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Fetch many keys in one round trip. The result has one slot per key.
    async fn get_many(&self, keys: &[String]) -> AppResult<Vec<Option<String>>>;

    /// `SET key value NX PX ttl`. Returns `true` when the key was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool>;

    /// Delete `key` only if it still holds `expected`.
    /// Returns `true` when the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> AppResult<bool>;

    /// Execute a batch of writes in one pipeline.
    async fn write_batch(&self, writes: &[CacheWrite]) -> AppResult<()>;

    /// Set a hash field and refresh the TTL of the whole hash.
    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl: Duration)
    -> AppResult<()>;

    /// Remove a hash field.
    async fn hash_delete(&self, key: &str, field: &str) -> AppResult<()>;

    /// Read every field of a hash.
    async fn hash_get_all(&self, key: &str) -> AppResult<Vec<(String, String)>>;

    /// Check connectivity.
    async fn health_check(&self) -> AppResult<bool>;

    /// Fetch a single key.
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut values = self.get_many(&[key.to_string()]).await?;
        Ok(values.pop().flatten())
    }
}
