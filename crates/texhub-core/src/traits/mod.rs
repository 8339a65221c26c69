//! Core traits defined in `texhub-core` and implemented by other crates.

pub mod cache;
pub mod document;
pub mod epoch;

pub use cache::{CacheProvider, CacheWrite};
pub use document::DocumentService;
pub use epoch::{EpochField, EpochSource};
