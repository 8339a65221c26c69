//! JWT token creation with configurable signing and TTL.

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

use texhub_core::config::AuthConfig;
use texhub_core::error::AppError;
use texhub_core::result::AppResult;

use super::claims::ExpiringClaims;

/// Creates signed tokens.
#[derive(Clone)]
pub struct JwtEncoder {
    /// HMAC secret key for signing.
    encoding_key: EncodingKey,
    /// Header carrying the configured algorithm.
    header: Header,
    /// Lifetime stamped by [`Self::set_expiry_and_sign`].
    ttl_seconds: i64,
}

impl std::fmt::Debug for JwtEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtEncoder")
            .field("algorithm", &self.header.alg)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl JwtEncoder {
    /// Creates a new encoder from auth configuration.
    pub fn new(config: &AuthConfig, algorithm: Algorithm) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            header: Header::new(algorithm),
            ttl_seconds: config.jwt_ttl().as_secs() as i64,
        }
    }

    /// Sign the claims unchanged.
    pub fn sign<C: ExpiringClaims>(&self, claims: &C) -> AppResult<String> {
        encode(&self.header, claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to encode token: {e}")))
    }

    /// Set `exp` to now + ttl, then sign.
    pub fn set_expiry_and_sign<C: ExpiringClaims>(&self, claims: &mut C) -> AppResult<String> {
        claims.set_expires_at(Utc::now().timestamp() + self.ttl_seconds);
        self.sign(claims)
    }
}
