//! In-memory pub/sub for single-node deployments and tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use texhub_core::error::AppError;
use texhub_core::result::AppResult;

use super::{BackendEvent, PubSubBackend, PubSubConnection};

enum Delivery {
    Event(BackendEvent),
    Lost,
}

type Subscribers = HashMap<String, HashMap<u64, mpsc::UnboundedSender<Delivery>>>;

#[derive(Default)]
struct Inner {
    /// Channel name → connection id → delivery queue.
    subscribers: Mutex<Subscribers>,
    /// Live connections, for `drop_connections`.
    connections: Mutex<HashMap<u64, mpsc::UnboundedSender<Delivery>>>,
    next_id: AtomicU64,
    refuse_connect: AtomicBool,
    closed: CancellationToken,
}

/// In-memory pub/sub implementation.
#[derive(Clone, Default)]
pub struct MemoryPubSub {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPubSub").finish()
    }
}

impl MemoryPubSub {
    /// Create a new in-memory pub/sub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        lock(&self.inner.subscribers)
            .get(channel)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Sever every live connection, as a broker restart would.
    pub fn drop_connections(&self) {
        lock(&self.inner.subscribers).clear();
        for (_, tx) in lock(&self.inner.connections).drain() {
            let _ = tx.send(Delivery::Lost);
        }
    }

    /// Make `connect` fail until switched back.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Close the backend; every connection reports a terminal close.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PubSubBackend for MemoryPubSub {
    async fn connect(&self) -> AppResult<Box<dyn PubSubConnection>> {
        if self.inner.closed.is_cancelled() {
            return Err(AppError::service_unavailable("pub/sub backend closed"));
        }
        if self.inner.refuse_connect.load(Ordering::SeqCst) {
            return Err(AppError::cache("pub/sub connection refused"));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.connections).insert(id, tx.clone());
        Ok(Box::new(MemoryConnection {
            id,
            inner: Arc::clone(&self.inner),
            tx,
            rx,
            channels: HashSet::new(),
        }))
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> AppResult<()> {
        let subscribers = lock(&self.inner.subscribers);
        if let Some(conns) = subscribers.get(channel) {
            for tx in conns.values() {
                let _ = tx.send(Delivery::Event(BackendEvent::Message {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                }));
            }
        }
        Ok(())
    }
}

struct MemoryConnection {
    id: u64,
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<Delivery>,
    rx: mpsc::UnboundedReceiver<Delivery>,
    channels: HashSet<String>,
}

#[async_trait]
impl PubSubConnection for MemoryConnection {
    async fn subscribe(&mut self, channel: &str) -> AppResult<()> {
        lock(&self.inner.subscribers)
            .entry(channel.to_string())
            .or_default()
            .insert(self.id, self.tx.clone());
        self.channels.insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> AppResult<()> {
        {
            let mut subscribers = lock(&self.inner.subscribers);
            if let Some(conns) = subscribers.get_mut(channel) {
                conns.remove(&self.id);
                if conns.is_empty() {
                    subscribers.remove(channel);
                }
            }
        }
        self.channels.remove(channel);
        let _ = self.tx.send(Delivery::Event(BackendEvent::Unsubscribed {
            channel: channel.to_string(),
        }));
        Ok(())
    }

    async fn next_event(&mut self) -> Option<AppResult<BackendEvent>> {
        tokio::select! {
            _ = self.inner.closed.cancelled() => None,
            delivery = self.rx.recv() => match delivery {
                Some(Delivery::Event(event)) => Some(Ok(event)),
                Some(Delivery::Lost) | None => {
                    Some(Err(AppError::cache("pub/sub connection lost")))
                }
            },
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        lock(&self.inner.connections).remove(&self.id);
        let mut subscribers = lock(&self.inner.subscribers);
        for channel in &self.channels {
            if let Some(conns) = subscribers.get_mut(channel) {
                conns.remove(&self.id);
                if conns.is_empty() {
                    subscribers.remove(channel);
                }
            }
        }
    }
}
