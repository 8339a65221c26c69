//! Shared fixtures for unit tests.

use std::sync::Arc;

use futures::SinkExt;
use futures::StreamExt;
use futures::channel::mpsc as fmpsc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use texhub_core::config::RealtimeConfig;
use texhub_core::error::AppError;

use crate::bridge::MemoryPubSub;
use crate::channel::{ChannelEvent, ChannelManager};
use crate::connection::{WriteQueue, WriterPool, WsSink};
use crate::metrics::TransportMetrics;

pub struct Fixture {
    pub pubsub: MemoryPubSub,
    pub channels: Arc<ChannelManager>,
    pub events: Option<mpsc::Receiver<ChannelEvent>>,
    pub writers: Arc<WriterPool>,
    pub cancel: CancellationToken,
}

impl Fixture {
    pub fn new() -> Self {
        let config = RealtimeConfig::default();
        let metrics = Arc::new(TransportMetrics::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let pubsub = MemoryPubSub::new();
        let (channels, events) = ChannelManager::start(
            &config,
            Arc::new(pubsub.clone()),
            Arc::clone(&metrics),
            &tracker,
            cancel.clone(),
        );
        let writers = WriterPool::start(&config, metrics, &tracker, cancel.clone());
        Self {
            pubsub,
            channels,
            events: Some(events),
            writers,
            cancel,
        }
    }

    /// A write queue whose frames come out of the returned receiver.
    pub fn client_queue(&self) -> (Arc<WriteQueue>, fmpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = fmpsc::unbounded();
        let sink: WsSink = Box::pin(tx.sink_map_err(|e| AppError::internal(e.to_string())));
        (self.writers.queue(sink, CancellationToken::new()), rx)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Next text frame as JSON.
pub async fn next_json(rx: &mut fmpsc::UnboundedReceiver<Message>) -> serde_json::Value {
    match rx.next().await {
        Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}
