//! Primary-store access to authorization epochs.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// The kind of entity an epoch is stamped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochField {
    /// A user's account-level permissions.
    User,
    /// A project's membership and sharing settings.
    Project,
}

impl EpochField {
    /// Name used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for EpochField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative source of epochs (the primary datastore).
#[async_trait]
pub trait EpochSource: Send + Sync + fmt::Debug + 'static {
    /// Read the current epoch of an entity.
    async fn fetch_epoch(&self, field: EpochField, entity_id: &str) -> AppResult<i64>;

    /// Increment the epoch of an entity and return the new value.
    async fn increment_epoch(&self, field: EpochField, entity_id: &str) -> AppResult<i64>;
}
