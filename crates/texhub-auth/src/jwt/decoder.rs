//! JWT token validation.

use std::marker::PhantomData;

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use texhub_core::config::AuthConfig;
use texhub_core::error::AppError;
use texhub_core::result::AppResult;

use super::claims::ExpiringClaims;

/// Validates tokens and yields claims of type `C`.
#[derive(Clone)]
pub struct JwtDecoder<C> {
    /// HMAC secret key for verification.
    decoding_key: DecodingKey,
    /// Validation configuration.
    validation: Validation,
    _claims: PhantomData<fn() -> C>,
}

impl<C> std::fmt::Debug for JwtDecoder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtDecoder")
            .field("validation", &self.validation)
            .finish()
    }
}

impl<C: ExpiringClaims> JwtDecoder<C> {
    /// Creates a new decoder from auth configuration.
    pub fn new(config: &AuthConfig, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.leeway = config.jwt_leeway_seconds;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            _claims: PhantomData,
        }
    }

    /// Verify signature and expiry.
    pub fn parse(&self, token: &str) -> AppResult<C> {
        let token_data = decode::<C>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                JwtErrorKind::ExpiredSignature => AppError::unauthorized("Token has expired"),
                JwtErrorKind::InvalidToken => AppError::unauthorized("Invalid token format"),
                JwtErrorKind::InvalidSignature => {
                    AppError::unauthorized("Invalid token signature")
                }
                _ => AppError::unauthorized(format!("Token validation failed: {e}")),
            }
        })?;

        Ok(token_data.claims)
    }
}
