//! Redis, distributed lock, and epoch cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key prefix prepended to every key the service writes.
    #[serde(default)]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: String::new(),
        }
    }
}

/// Per-document distributed lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Key namespace; the full key is `<namespace>{<entityId>}`.
    #[serde(default = "default_lock_namespace")]
    pub namespace: String,
    /// Lock time-to-live in milliseconds.
    #[serde(default = "default_lock_ttl")]
    pub ttl_ms: u64,
    /// Maximum time a polling acquire waits, in milliseconds.
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,
    /// First polling backoff delay, in milliseconds.
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
    /// Backoff cap, in milliseconds.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Deadline for a single Redis round trip, in milliseconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

impl LockConfig {
    /// Lock TTL.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Maximum polling wait.
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Single round-trip deadline.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            namespace: default_lock_namespace(),
            ttl_ms: default_lock_ttl(),
            max_wait_ms: default_max_wait(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

/// Epoch authorization cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochConfig {
    /// TTL of a cached epoch value, in seconds.
    #[serde(default = "default_epoch_ttl")]
    pub ttl_seconds: u64,
    /// TTL of a tombstone, in seconds.
    #[serde(default = "default_tombstone_ttl")]
    pub tombstone_ttl_seconds: u64,
    /// Deadline for the asynchronous write-back pipeline, in milliseconds.
    #[serde(default = "default_write_back_timeout")]
    pub write_back_timeout_ms: u64,
}

impl EpochConfig {
    /// Cached value TTL.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Tombstone TTL.
    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(self.tombstone_ttl_seconds)
    }

    /// Write-back deadline.
    pub fn write_back_timeout(&self) -> Duration {
        Duration::from_millis(self.write_back_timeout_ms)
    }
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_epoch_ttl(),
            tombstone_ttl_seconds: default_tombstone_ttl(),
            write_back_timeout_ms: default_write_back_timeout(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_lock_namespace() -> String {
    "doclock".to_string()
}

fn default_lock_ttl() -> u64 {
    30_000
}

fn default_max_wait() -> u64 {
    10_000
}

fn default_backoff_initial() -> u64 {
    50
}

fn default_backoff_max() -> u64 {
    1_000
}

fn default_operation_timeout() -> u64 {
    1_000
}

fn default_epoch_ttl() -> u64 {
    24 * 60 * 60
}

fn default_tombstone_ttl() -> u64 {
    60
}

fn default_write_back_timeout() -> u64 {
    3_000
}
