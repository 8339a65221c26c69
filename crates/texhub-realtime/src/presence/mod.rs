//! Per-project presence of connected clients.

pub mod store;

pub use store::PresenceStore;
