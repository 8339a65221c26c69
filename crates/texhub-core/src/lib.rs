//! # texhub-core
//!
//! Core crate for the TexHub real-time service. Contains the unified error
//! system, configuration schemas, typed identifiers, the store traits the
//! consistency layer is written against, and the retry/clock primitives.
//!
//! This crate has **no** internal dependencies on other TexHub crates.

pub mod config;
pub mod error;
pub mod result;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
