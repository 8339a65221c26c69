//! # texhub-realtime
//!
//! Real-time collaboration server for TexHub. Provides:
//!
//! - A raw HTTP/1.1 connection server with status check and WebSocket hijack
//! - Bounded per-connection write queues drained by a shared worker pool
//! - A bootstrap pool with soft and hard deadlines
//! - Room-level pub/sub fan-out via Redis (or in-process for one node)
//! - Sessions, RPC dispatch, presence, and forced disconnects

pub mod bridge;
pub mod channel;
pub mod connection;
pub mod document;
pub mod message;
pub mod metrics;
pub mod presence;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use bridge::{MemoryPubSub, PubSubBackend};
#[cfg(feature = "redis-pubsub")]
pub use bridge::RedisPubSub;
pub use channel::ChannelManager;
pub use document::HttpDocumentService;
pub use metrics::TransportMetrics;
pub use server::{EngineDeps, RealtimeEngine};
pub use session::{AccessRevoker, RoomManager};
pub use transport::{ConnectionServer, Listener};
