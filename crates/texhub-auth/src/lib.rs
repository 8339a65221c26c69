//! # texhub-auth
//!
//! Compact bearer tokens for the real-time layer.
//!
//! ## Modules
//!
//! - `jwt`: HMAC signing and parsing, generic over one claims type per handler
//! - `validator`: project token validation: signature, expiry, then epochs

pub mod jwt;
pub mod validator;

pub use jwt::{ExpiringClaims, JwtHandler, PrivilegeLevel, ProjectJwtClaims};
pub use validator::ProjectJwtValidator;
