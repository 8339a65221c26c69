//! TexHub real-time server.
//!
//! Main entry point that wires the cache, the primary datastore, pub/sub,
//! and the connection server together.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use texhub_cache::CacheManager;
use texhub_cache::provider::MEMORY_URL_SCHEME;
use texhub_cache::redis::RedisClient;
use texhub_core::config::{AppConfig, LogFormat, LoggingConfig};
use texhub_core::error::AppError;
use texhub_core::traits::{DocumentService, EpochSource};
use texhub_database::{DatabasePool, EpochRepository};
use texhub_realtime::{
    EngineDeps, HttpDocumentService, Listener, MemoryPubSub, PubSubBackend, RealtimeEngine, RedisPubSub,
};

#[tokio::main]
async fn main() {
    let env = std::env::var("TEXHUB_ENV").unwrap_or_else(|_| "development".to_string());
    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);
    tracing::info!(env = %env, "Configuration loaded");

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the configured level.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = fmt().with_env_filter(filter).with_target(true);

    match config.format {
        LogFormat::Json => builder.json().with_thread_ids(config.thread_ids).init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting TexHub real-time v{}", env!("CARGO_PKG_VERSION"));

    let cache = CacheManager::new(&config.redis).await?;

    let db = DatabasePool::connect(&config.database).await?;
    let epoch_source: Arc<dyn EpochSource> = Arc::new(EpochRepository::new(db.pool().clone()));

    let pubsub = pubsub_backend(&config).await?;
    let documents: Arc<dyn DocumentService> = Arc::new(HttpDocumentService::new(
        &config.realtime.document_updater_url,
        config.realtime.rpc_timeout(),
    )?);

    let engine = Arc::new(RealtimeEngine::new(
        &config,
        EngineDeps {
            cache: cache.provider(),
            epoch_source,
            pubsub,
            documents,
        },
    )?);

    let listener = Listener::bind(&config.server.listen_address).await?;
    let serving = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.serve(listener).await })
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
    engine.shutdown().await;

    match serving.await {
        Ok(result) => result?,
        Err(e) => tracing::error!(error = %e, "Accept loop panicked"),
    }
    db.close().await;

    tracing::info!("TexHub real-time server shut down gracefully");
    Ok(())
}

/// Redis pub/sub, or the in-process bus when the cache runs in memory.
async fn pubsub_backend(config: &AppConfig) -> Result<Arc<dyn PubSubBackend>, AppError> {
    if config.redis.url.starts_with(MEMORY_URL_SCHEME) {
        tracing::warn!("In-process pub/sub: rooms are not shared with other nodes");
        return Ok(Arc::new(MemoryPubSub::new()));
    }
    let client = RedisClient::connect(&config.redis).await?;
    Ok(Arc::new(RedisPubSub::new(client)))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
