//! Shared workers that drain client write queues.
//!
//! Connections do not own a writer task. A queue with pending entries is
//! put on the scheduler channel once; an idle worker picks it up, writes a
//! batch, and hands it back if more entries arrived.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use texhub_core::config::RealtimeConfig;
use texhub_core::result::AppResult;

use crate::message::{LazySuccessBatch, RpcResponse};
use crate::metrics::TransportMetrics;

use super::write_queue::{WriteQueue, WriteQueueEntry, WsSink};

/// Entries taken from one queue per pass, so a busy client cannot starve
/// the others.
const ENTRIES_PER_PASS: usize = 64;

type Scheduled = Arc<Mutex<mpsc::UnboundedReceiver<Arc<WriteQueue>>>>;

#[derive(Debug, Clone, Copy)]
struct Settings {
    lazy_success_batch_max: usize,
    write_timeout: Duration,
}

/// Pool of writer workers.
#[derive(Debug)]
pub struct WriterPool {
    scheduler: mpsc::UnboundedSender<Arc<WriteQueue>>,
    capacity: usize,
    metrics: Arc<TransportMetrics>,
}

impl WriterPool {
    /// Spawn `writer_workers` workers on `tracker`.
    pub fn start(
        config: &RealtimeConfig,
        metrics: Arc<TransportMetrics>,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (scheduler, rx) = mpsc::unbounded_channel();
        let rx: Scheduled = Arc::new(Mutex::new(rx));
        let settings = Settings {
            lazy_success_batch_max: config.lazy_success_batch_max.max(1),
            write_timeout: config.write_timeout(),
        };
        for worker in 0..config.writer_workers.max(1) {
            tracker.spawn(run_worker(worker, Arc::clone(&rx), settings, cancel.clone()));
        }
        Arc::new(Self {
            scheduler,
            capacity: config.write_queue_capacity.max(1),
            metrics,
        })
    }

    /// Create the write queue of a new connection.
    pub fn queue(&self, sink: WsSink, cancel: CancellationToken) -> Arc<WriteQueue> {
        WriteQueue::new(
            sink,
            self.capacity,
            cancel,
            self.scheduler.clone(),
            Arc::clone(&self.metrics),
        )
    }
}

async fn run_worker(worker: usize, rx: Scheduled, settings: Settings, cancel: CancellationToken) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                queue = rx.recv() => queue,
            }
        };
        let Some(queue) = next else {
            break;
        };
        drain(&queue, settings).await;
        queue.finish_pass();
    }
    debug!(worker, "Writer worker stopped");
}

/// Frames produced from one batch of entries.
struct Prepared {
    frames: Vec<Message>,
    lazy_batches: u64,
    closing: bool,
}

impl Prepared {
    fn push_lazy(&mut self, callbacks: &mut Vec<u64>) {
        let batch = LazySuccessBatch {
            callbacks: std::mem::take(callbacks),
        };
        match serde_json::to_string(&batch) {
            Ok(text) => {
                self.frames.push(Message::text(text));
                self.lazy_batches += 1;
            }
            Err(e) => {
                warn!(error = %e, callbacks = ?batch.callbacks, "Dropping unserialisable lazy success batch");
            }
        }
    }
}

fn prepare<E>(entries: Vec<WriteQueueEntry>, lazy_max: usize, encode: E) -> Prepared
where
    E: Fn(&RpcResponse) -> serde_json::Result<String>,
{
    let mut prepared = Prepared {
        frames: Vec::with_capacity(entries.len()),
        lazy_batches: 0,
        closing: false,
    };
    let mut lazy: Vec<u64> = Vec::new();

    for entry in entries {
        if !matches!(entry, WriteQueueEntry::LazySuccess(_)) && !lazy.is_empty() {
            prepared.push_lazy(&mut lazy);
        }
        match entry {
            WriteQueueEntry::LazySuccess(callback) => {
                lazy.push(callback);
                if lazy.len() >= lazy_max {
                    prepared.push_lazy(&mut lazy);
                }
            }
            WriteQueueEntry::Frame(message) => prepared.frames.push(message),
            WriteQueueEntry::Rpc(response) => match encode(&response) {
                Ok(text) => prepared.frames.push(Message::text(text)),
                Err(e) => {
                    warn!(callback = response.callback, error = %e, "Dropping unserialisable RPC response");
                }
            },
            WriteQueueEntry::Close(frame) => {
                prepared.frames.push(Message::Close(frame));
                prepared.closing = true;
                break;
            }
        }
    }
    if !lazy.is_empty() {
        prepared.push_lazy(&mut lazy);
    }
    prepared
}

async fn drain(queue: &Arc<WriteQueue>, settings: Settings) {
    if queue.cancel_token().is_cancelled() {
        queue.clear();
        return;
    }
    let entries = queue.take_batch(ENTRIES_PER_PASS);
    if entries.is_empty() {
        return;
    }

    let prepared = prepare(
        entries,
        settings.lazy_success_batch_max,
        serde_json::to_string::<RpcResponse>,
    );
    if prepared.frames.is_empty() {
        return;
    }

    let mut slot = queue.sink.lock().await;
    let Some(sink) = slot.as_mut() else {
        queue.clear();
        return;
    };

    let frame_count = prepared.frames.len() as u64;
    let closing = prepared.closing;
    let written = timeout(settings.write_timeout, write_frames(sink, prepared.frames, closing)).await;

    match written {
        Ok(Ok(())) => {
            queue
                .metrics
                .frames_written
                .fetch_add(frame_count, std::sync::atomic::Ordering::Relaxed);
            queue
                .metrics
                .lazy_batches
                .fetch_add(prepared.lazy_batches, std::sync::atomic::Ordering::Relaxed);
            if closing {
                *slot = None;
                queue.clear();
                queue.cancel_token().cancel();
            }
        }
        Ok(Err(e)) => {
            debug!(error = %e, "Client write failed");
            *slot = None;
            queue.clear();
            queue.cancel_token().cancel();
        }
        Err(_) => {
            debug!("Client write timed out");
            *slot = None;
            queue.clear();
            queue.cancel_token().cancel();
        }
    }
}

async fn write_frames(sink: &mut WsSink, frames: Vec<Message>, closing: bool) -> AppResult<()> {
    for frame in frames {
        sink.feed(frame).await?;
    }
    sink.flush().await?;
    if closing {
        sink.close().await?;
    }
    Ok(())
}
