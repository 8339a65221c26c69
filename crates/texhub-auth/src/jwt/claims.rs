//! Claims carried by project tokens.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use texhub_core::types::{ProjectId, UserId};

/// Claims types that carry an `exp` timestamp.
pub trait ExpiringClaims: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Expiry in seconds since the Unix epoch.
    fn expires_at(&self) -> i64;

    /// Replace the expiry.
    fn set_expires_at(&mut self, exp: i64);
}

/// What a project member may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrivilegeLevel {
    /// Project owner.
    Owner,
    /// Collaborator with write access.
    ReadAndWrite,
    /// Viewer.
    ReadOnly,
}

impl PrivilegeLevel {
    /// Whether document updates are allowed.
    pub fn can_write(&self) -> bool {
        matches!(self, Self::Owner | Self::ReadAndWrite)
    }
}

/// Claims of the token a browser presents when joining a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectJwtClaims {
    /// Expiry (seconds since epoch).
    #[serde(rename = "exp")]
    pub expires_at: i64,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub privilege_level: PrivilegeLevel,
    /// Project epoch at signing time.
    #[serde(rename = "epoch")]
    pub project_epoch: i64,
    /// User epoch at signing time.
    #[serde(rename = "epochUser")]
    pub user_epoch: i64,
    #[serde(default)]
    pub is_token_member: bool,
    #[serde(default)]
    pub is_restricted_user: bool,
}

impl ExpiringClaims for ProjectJwtClaims {
    fn expires_at(&self) -> i64 {
        self.expires_at
    }

    fn set_expires_at(&mut self, exp: i64) {
        self.expires_at = exp;
    }
}
