//! JWT token encoding, decoding, and claims management.

pub mod claims;
pub mod decoder;
pub mod encoder;

use jsonwebtoken::Algorithm;

use texhub_core::config::AuthConfig;
use texhub_core::error::AppError;
use texhub_core::result::AppResult;

pub use claims::{ExpiringClaims, PrivilegeLevel, ProjectJwtClaims};
pub use decoder::JwtDecoder;
pub use encoder::JwtEncoder;

/// Signs and parses tokens carrying one concrete claims type.
#[derive(Debug, Clone)]
pub struct JwtHandler<C> {
    encoder: JwtEncoder,
    decoder: JwtDecoder<C>,
}

impl<C: ExpiringClaims> JwtHandler<C> {
    /// Build a handler from auth configuration.
    pub fn new(config: &AuthConfig) -> AppResult<Self> {
        if config.jwt_secret.is_empty() {
            return Err(AppError::configuration("auth.jwt_secret must be set"));
        }
        let algorithm = parse_algorithm(&config.jwt_algorithm)?;
        Ok(Self {
            encoder: JwtEncoder::new(config, algorithm),
            decoder: JwtDecoder::new(config, algorithm),
        })
    }

    /// Sign `claims` as they are.
    pub fn sign(&self, claims: &C) -> AppResult<String> {
        self.encoder.sign(claims)
    }

    /// Stamp a fresh expiry on `claims` and sign them.
    pub fn set_expiry_and_sign(&self, claims: &mut C) -> AppResult<String> {
        self.encoder.set_expiry_and_sign(claims)
    }

    /// Verify signature and expiry and return the claims.
    pub fn parse(&self, token: &str) -> AppResult<C> {
        self.decoder.parse(token)
    }
}

/// Map a configured algorithm name to an HMAC algorithm.
pub fn parse_algorithm(name: &str) -> AppResult<Algorithm> {
    match name.to_ascii_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(AppError::configuration(format!(
            "Unsupported JWT algorithm '{other}'"
        ))),
    }
}
