//! Authoritative epochs stored on the `users` and `projects` tables.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use texhub_core::error::{AppError, ErrorKind};
use texhub_core::result::AppResult;
use texhub_core::traits::epoch::{EpochField, EpochSource};

/// Repository reading and bumping entity epochs.
#[derive(Debug, Clone)]
pub struct EpochRepository {
    pool: PgPool,
}

impl EpochRepository {
    /// Create a new epoch repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn table(field: EpochField) -> &'static str {
    match field {
        EpochField::User => "users",
        EpochField::Project => "projects",
    }
}

fn parse_id(field: EpochField, entity_id: &str) -> AppResult<Uuid> {
    Uuid::try_parse(entity_id)
        .map_err(|e| AppError::with_source(ErrorKind::Validation, format!("invalid {field} id"), e))
}

#[async_trait]
impl EpochSource for EpochRepository {
    async fn fetch_epoch(&self, field: EpochField, entity_id: &str) -> AppResult<i64> {
        let id = parse_id(field, entity_id)?;
        let sql = format!("SELECT epoch FROM {} WHERE id = $1", table(field));
        sqlx::query_scalar::<_, i64>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, format!("Failed to read {field} epoch"), e)
            })?
            .ok_or_else(|| AppError::not_found(format!("{field} {entity_id} not found")))
    }

    async fn increment_epoch(&self, field: EpochField, entity_id: &str) -> AppResult<i64> {
        let id = parse_id(field, entity_id)?;
        let sql = format!(
            "UPDATE {} SET epoch = epoch + 1 WHERE id = $1 RETURNING epoch",
            table(field)
        );
        let epoch = sqlx::query_scalar::<_, i64>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Database,
                    format!("Failed to increment {field} epoch"),
                    e,
                )
            })?
            .ok_or_else(|| AppError::not_found(format!("{field} {entity_id} not found")))?;

        debug!(%field, entity_id, epoch, "Incremented epoch");
        Ok(epoch)
    }
}
