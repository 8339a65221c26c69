//! PostgreSQL pool used for authoritative epoch reads and bumps.

use std::time::Duration;

use sqlx::Executor;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use texhub_core::config::{DatabaseConfig, redact_url};
use texhub_core::error::{AppError, ErrorKind};
use texhub_core::result::AppResult;
use texhub_core::retry::{Backoff, Clock, TokioClock};

/// Wrapper around the sqlx PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connect, retrying with backoff up to `connect_attempts` times.
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let url = redact_url(&config.url);
        let backoff = Backoff::exponential(Duration::from_millis(500), Duration::from_secs(5));
        let attempts = config.connect_attempts.max(1);

        for (attempt, delay) in (1..=attempts).zip(backoff.delays()) {
            match options(config).connect(&config.url).await {
                Ok(pool) => {
                    info!(url = %url, attempt, "Connected to PostgreSQL");
                    return Ok(Self { pool });
                }
                Err(e) if attempt < attempts => {
                    warn!(url = %url, attempt, error = %e, "PostgreSQL not reachable, retrying");
                    TokioClock.sleep(delay).await;
                }
                Err(e) => {
                    return Err(AppError::with_source(
                        ErrorKind::Database,
                        format!("Failed to connect to {url} after {attempts} attempts"),
                        e,
                    ));
                }
            }
        }
        Err(AppError::database("No connection attempt was made"))
    }

    /// Build the pool without touching the network; connections open on
    /// first use.
    pub fn connect_lazy(config: &DatabaseConfig) -> AppResult<Self> {
        let pool = options(config).connect_lazy(&config.url).map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Invalid database URL", e)
        })?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Database ping failed", e))
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

fn options(config: &DatabaseConfig) -> PgPoolOptions {
    let statement_timeout = format!("SET statement_timeout = {}", config.statement_timeout_ms);
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        .after_connect(move |conn, _meta| {
            let statement_timeout = statement_timeout.clone();
            Box::pin(async move {
                conn.execute(statement_timeout.as_str()).await?;
                Ok(())
            })
        })
}
