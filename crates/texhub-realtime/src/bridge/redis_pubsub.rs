//! Redis pub/sub backend for multi-node deployments.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::{PubSubSink, PubSubStream};
use tracing::info;

use texhub_cache::redis::RedisClient;
use texhub_core::error::{AppError, ErrorKind};
use texhub_core::result::AppResult;

use super::{BackendEvent, PubSubBackend, PubSubConnection};

/// Redis pub/sub backend.
///
/// Publishing goes through the shared connection manager; every
/// subscription connection is a dedicated RESP connection.
#[derive(Debug, Clone)]
pub struct RedisPubSub {
    client: RedisClient,
}

impl RedisPubSub {
    /// Creates a new Redis pub/sub backend.
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Cache, format!("Redis pub/sub error: {e}"), e)
    }
}

#[async_trait]
impl PubSubBackend for RedisPubSub {
    async fn connect(&self) -> AppResult<Box<dyn PubSubConnection>> {
        let pubsub = self.client.open_pubsub().await?;
        let (sink, stream) = pubsub.split();
        info!("Opened Redis subscription connection");
        Ok(Box::new(RedisConnection {
            sink,
            stream,
            pending: VecDeque::new(),
        }))
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> AppResult<()> {
        let mut conn = self.client.connection();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload.as_ref())
            .query_async::<i64>(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}

struct RedisConnection {
    sink: PubSubSink,
    stream: PubSubStream,
    /// Acks the stream does not surface itself.
    pending: VecDeque<BackendEvent>,
}

#[async_trait]
impl PubSubConnection for RedisConnection {
    async fn subscribe(&mut self, channel: &str) -> AppResult<()> {
        self.sink
            .subscribe(channel)
            .await
            .map_err(RedisPubSub::map_err)
    }

    async fn unsubscribe(&mut self, channel: &str) -> AppResult<()> {
        self.sink
            .unsubscribe(channel)
            .await
            .map_err(RedisPubSub::map_err)?;
        self.pending.push_back(BackendEvent::Unsubscribed {
            channel: channel.to_string(),
        });
        Ok(())
    }

    async fn next_event(&mut self) -> Option<AppResult<BackendEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Some(Ok(event));
        }
        match self.stream.next().await {
            Some(msg) => Some(Ok(BackendEvent::Message {
                channel: msg.get_channel_name().to_string(),
                payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
            })),
            None => Some(Err(AppError::cache("Redis subscription connection lost"))),
        }
    }
}
