//! Project token validation.

use std::sync::Arc;

use tracing::debug;

use texhub_cache::epoch::{EpochCache, EpochItem};
use texhub_core::config::AuthConfig;
use texhub_core::result::AppResult;
use texhub_core::traits::epoch::{EpochField, EpochSource};

use crate::jwt::{JwtHandler, ProjectJwtClaims};

/// Accepts a project token only if it is correctly signed, unexpired,
/// and both of its epochs are current.
#[derive(Debug, Clone)]
pub struct ProjectJwtValidator {
    handler: JwtHandler<ProjectJwtClaims>,
    epochs: EpochCache,
    source: Arc<dyn EpochSource>,
}

impl ProjectJwtValidator {
    /// Build a validator.
    pub fn new(
        config: &AuthConfig,
        epochs: EpochCache,
        source: Arc<dyn EpochSource>,
    ) -> AppResult<Self> {
        Ok(Self {
            handler: JwtHandler::new(config)?,
            epochs,
            source,
        })
    }

    /// The underlying token handler.
    pub fn handler(&self) -> &JwtHandler<ProjectJwtClaims> {
        &self.handler
    }

    /// Parse `token` and verify its epochs.
    pub async fn validate(&self, token: &str) -> AppResult<ProjectJwtClaims> {
        let claims = self.handler.parse(token)?;
        let items = [
            EpochItem::new(
                EpochField::User,
                claims.user_id.to_string(),
                claims.user_epoch,
                Arc::clone(&self.source),
            ),
            EpochItem::new(
                EpochField::Project,
                claims.project_id.to_string(),
                claims.project_epoch,
                Arc::clone(&self.source),
            ),
        ];
        self.epochs.check(&items).await?;
        debug!(project_id = %claims.project_id, user_id = %claims.user_id, "Project token accepted");
        Ok(claims)
    }
}
