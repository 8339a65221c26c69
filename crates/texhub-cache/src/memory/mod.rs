//! In-process cache provider, used by tests and single-node runs.

pub mod store;

pub use store::MemoryCacheProvider;
