//! # texhub-cache
//!
//! Shared-state primitives for the TexHub real-time layer:
//!
//! - **redis**: Redis-backed [`CacheProvider`](texhub_core::traits::CacheProvider)
//! - **memory**: in-process provider with the same TTL semantics (tests, single node)
//! - **lock**: per-document distributed mutual exclusion
//! - **epoch**: epoch-based authorization cache with tombstones
//!
//! The provider is selected at runtime based on configuration.

pub mod epoch;
pub mod keys;
pub mod lock;
#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use epoch::{EpochCache, EpochItem, TOMBSTONE};
pub use lock::{DocumentLock, LockGuard, TokenGenerator};
pub use provider::CacheManager;
