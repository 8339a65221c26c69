//! Bounded per-client write queue.
//!
//! Producers (RPC handlers, the room dispatcher) push entries; a worker from
//! the [`WriterPool`](super::writer_pool::WriterPool) drains them. A queue
//! sits in the scheduler channel at most once, so only one worker ever
//! writes to a given client and frames leave in push order.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::Sink;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use texhub_core::error::AppError;
use texhub_core::result::AppResult;

use crate::message::RpcResponse;
use crate::metrics::TransportMetrics;

/// Write half of a client connection.
pub type WsSink = Pin<Box<dyn Sink<Message, Error = AppError> + Send>>;

/// One pending write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteQueueEntry {
    /// Prepared frame, written as is.
    Frame(Message),
    /// Structured RPC response, serialised by the writer.
    Rpc(RpcResponse),
    /// Payload-less success, coalesced with its neighbours.
    LazySuccess(u64),
    /// Close frame. Nothing queued after it is written.
    Close(Option<CloseFrame>),
}

/// Bounded queue of writes for one client.
pub struct WriteQueue {
    entries: Mutex<VecDeque<WriteQueueEntry>>,
    capacity: usize,
    scheduled: AtomicBool,
    pub(super) sink: tokio::sync::Mutex<Option<WsSink>>,
    cancel: CancellationToken,
    scheduler: mpsc::UnboundedSender<Arc<WriteQueue>>,
    pub(super) metrics: Arc<TransportMetrics>,
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl WriteQueue {
    pub(super) fn new(
        sink: WsSink,
        capacity: usize,
        cancel: CancellationToken,
        scheduler: mpsc::UnboundedSender<Arc<WriteQueue>>,
        metrics: Arc<TransportMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            scheduled: AtomicBool::new(false),
            sink: tokio::sync::Mutex::new(Some(sink)),
            cancel,
            scheduler,
            metrics,
        })
    }

    /// Queue a write.
    ///
    /// A full queue means the client cannot keep up: the connection is
    /// cancelled instead of buffering without bound.
    pub fn push(self: &Arc<Self>, entry: WriteQueueEntry) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::service_unavailable("Connection is closing"));
        }
        {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| AppError::internal("Write queue poisoned"))?;
            if entries.len() >= self.capacity {
                entries.clear();
                drop(entries);
                TransportMetrics::inc(&self.metrics.queue_overflows);
                warn!(capacity = self.capacity, "Write queue overflow, disconnecting client");
                self.cancel.cancel();
                return Err(AppError::service_unavailable("Write queue overflow"));
            }
            entries.push_back(entry);
        }
        self.schedule();
        Ok(())
    }

    /// Queue a payload frame.
    pub fn push_frame(self: &Arc<Self>, message: Message) -> AppResult<()> {
        self.push(WriteQueueEntry::Frame(message))
    }

    /// Token cancelled when this connection is over.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Pending entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(super) fn schedule(self: &Arc<Self>) {
        if !self.scheduled.swap(true, Ordering::SeqCst) && self.scheduler.send(Arc::clone(self)).is_err() {
            // Writer pool is gone; nothing will ever drain this queue.
            self.cancel.cancel();
        }
    }

    /// Take up to `max` entries from the front.
    pub(super) fn take_batch(&self, max: usize) -> Vec<WriteQueueEntry> {
        match self.entries.lock() {
            Ok(mut entries) => {
                let n = entries.len().min(max);
                entries.drain(..n).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    pub(super) fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Called by the worker once it is done with this queue. Schedules the
    /// queue again if entries arrived meanwhile.
    pub(super) fn finish_pass(self: &Arc<Self>) {
        self.scheduled.store(false, Ordering::SeqCst);
        if !self.cancel.is_cancelled() && !self.is_empty() {
            self.schedule();
        }
    }
}
