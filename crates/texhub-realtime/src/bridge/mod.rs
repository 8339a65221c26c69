//! Pub/sub backends that carry room events between server processes.
//!
//! A backend hands out one multiplexed subscription connection per
//! [`ChannelManager`](crate::channel::ChannelManager); channels are added
//! and removed on that connection instead of opening one per room.

pub mod memory_pubsub;
#[cfg(feature = "redis-pubsub")]
pub mod redis_pubsub;

use async_trait::async_trait;
use bytes::Bytes;

use texhub_core::result::AppResult;

pub use memory_pubsub::MemoryPubSub;
#[cfg(feature = "redis-pubsub")]
pub use redis_pubsub::RedisPubSub;

/// Something observed on a subscription connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A published payload.
    Message { channel: String, payload: Bytes },
    /// The server confirmed an unsubscribe.
    Unsubscribed { channel: String },
}

/// Factory for subscription connections plus the publish path.
#[async_trait]
pub trait PubSubBackend: Send + Sync + std::fmt::Debug + 'static {
    /// Open a fresh subscription connection.
    async fn connect(&self) -> AppResult<Box<dyn PubSubConnection>>;

    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: Bytes) -> AppResult<()>;
}

/// One multiplexed subscription connection.
///
/// `next_event` must be cancel-safe: the channel manager polls it inside
/// `select!` next to its command queue.
#[async_trait]
pub trait PubSubConnection: Send {
    /// Add a channel.
    async fn subscribe(&mut self, channel: &str) -> AppResult<()>;

    /// Remove a channel. An [`BackendEvent::Unsubscribed`] follows.
    async fn unsubscribe(&mut self, channel: &str) -> AppResult<()>;

    /// Next event. `None` means the backend was closed for good;
    /// `Some(Err(_))` means this connection is lost and may be replaced.
    async fn next_event(&mut self) -> Option<AppResult<BackendEvent>>;
}
