//! Shared Redis handles: one reconnecting multiplexed connection for
//! commands, plus the client used to open dedicated pub/sub connections.

use redis::Client;
use redis::aio::{ConnectionManager, PubSub};
use tracing::info;

use texhub_core::config::{RedisConfig, redact_url};
use texhub_core::error::{AppError, ErrorKind};
use texhub_core::result::AppResult;

#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    commands: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

fn cache_error(message: &str, e: redis::RedisError) -> AppError {
    AppError::with_source(ErrorKind::Cache, format!("{message}: {e}"), e)
}

impl RedisClient {
    /// Open the command connection. Fails if Redis is unreachable now;
    /// later drops are healed by the connection manager.
    pub async fn connect(config: &RedisConfig) -> AppResult<Self> {
        let url = redact_url(&config.url);
        let client = Client::open(config.url.as_str())
            .map_err(|e| cache_error(&format!("Invalid Redis URL {url}"), e))?;
        let commands = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| cache_error(&format!("Redis at {url} unreachable"), e))?;

        info!(url = %url, key_prefix = %config.key_prefix, "Connected to Redis");
        Ok(Self {
            client,
            commands,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Handle on the shared command connection.
    pub fn connection(&self) -> ConnectionManager {
        self.commands.clone()
    }

    /// Open a dedicated RESP connection in subscriber mode.
    pub async fn open_pubsub(&self) -> AppResult<PubSub> {
        self.client
            .get_async_pubsub()
            .await
            .map_err(|e| cache_error("Failed to open Redis subscription connection", e))
    }

    /// `key` under the configured prefix.
    pub fn key(&self, key: &str) -> String {
        let mut full = String::with_capacity(self.key_prefix.len() + key.len());
        full.push_str(&self.key_prefix);
        full.push_str(key);
        full
    }
}
