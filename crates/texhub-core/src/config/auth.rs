//! Authentication configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Project token (JWT) signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret key for HMAC signing.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Signing algorithm: `HS256`, `HS384`, or `HS512`.
    #[serde(default = "default_algorithm")]
    pub jwt_algorithm: String,
    /// Token lifetime in seconds.
    #[serde(default = "default_ttl")]
    pub jwt_ttl_seconds: u64,
    /// Clock skew tolerance when checking `exp`, in seconds.
    #[serde(default)]
    pub jwt_leeway_seconds: u64,
}

impl AuthConfig {
    /// Token lifetime.
    pub fn jwt_ttl(&self) -> Duration {
        Duration::from_secs(self.jwt_ttl_seconds)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            jwt_algorithm: default_algorithm(),
            jwt_ttl_seconds: default_ttl(),
            jwt_leeway_seconds: 0,
        }
    }
}

fn default_jwt_secret() -> String {
    "CHANGE_ME_IN_PRODUCTION".to_string()
}

fn default_algorithm() -> String {
    "HS512".to_string()
}

fn default_ttl() -> u64 {
    3600
}
