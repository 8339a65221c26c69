//! Cache manager that dispatches to the configured provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use texhub_core::config::RedisConfig;
use texhub_core::error::AppError;
use texhub_core::result::AppResult;
use texhub_core::traits::cache::{CacheProvider, CacheWrite};

/// URL scheme selecting the in-process provider.
pub const MEMORY_URL_SCHEME: &str = "memory://";

/// Cache manager that wraps the configured cache provider.
///
/// The provider is selected at construction time from the Redis URL:
/// `memory://` yields the in-process provider, anything else is handed
/// to the Redis client.
#[derive(Debug, Clone)]
pub struct CacheManager {
    /// The inner cache provider.
    inner: Arc<dyn CacheProvider>,
}

impl CacheManager {
    /// Create a new cache manager from configuration.
    pub async fn new(config: &RedisConfig) -> AppResult<Self> {
        if config.url.starts_with(MEMORY_URL_SCHEME) {
            #[cfg(feature = "memory")]
            {
                info!("Initializing in-memory cache provider");
                return Ok(Self::from_provider(Arc::new(
                    crate::memory::MemoryCacheProvider::new(),
                )));
            }
            #[cfg(not(feature = "memory"))]
            return Err(AppError::configuration(
                "memory:// cache requested but the `memory` feature is disabled",
            ));
        }

        #[cfg(feature = "redis-backend")]
        {
            info!("Initializing Redis cache provider");
            let client = crate::redis::RedisClient::connect(config).await?;
            Ok(Self::from_provider(Arc::new(
                crate::redis::RedisCacheProvider::new(client),
            )))
        }
        #[cfg(not(feature = "redis-backend"))]
        Err(AppError::configuration(format!(
            "Unsupported cache url '{}': the `redis-backend` feature is disabled",
            config.url
        )))
    }

    /// Create a cache manager from an existing provider (for testing).
    pub fn from_provider(provider: Arc<dyn CacheProvider>) -> Self {
        Self { inner: provider }
    }

    /// Get a shared handle to the inner provider.
    pub fn provider(&self) -> Arc<dyn CacheProvider> {
        Arc::clone(&self.inner)
    }
}

#[async_trait]
impl CacheProvider for CacheManager {
    async fn get_many(&self, keys: &[String]) -> AppResult<Vec<Option<String>>> {
        self.inner.get_many(keys).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        self.inner.set_nx(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> AppResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn write_batch(&self, writes: &[CacheWrite]) -> AppResult<()> {
        self.inner.write_batch(writes).await
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> AppResult<()> {
        self.inner.hash_set(key, field, value, ttl).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> AppResult<()> {
        self.inner.hash_delete(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> AppResult<Vec<(String, String)>> {
        self.inner.hash_get_all(key).await
    }

    async fn health_check(&self) -> AppResult<bool> {
        self.inner.health_check().await
    }
}
