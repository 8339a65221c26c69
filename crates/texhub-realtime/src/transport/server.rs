//! Raw connection server.
//!
//! Every accepted socket goes through
//! `read head -> route -> {status | upgrade | reject}`. Only the upgrade
//! path keeps the socket: it is answered with 101 and handed, together
//! with any bytes read past the head, to the [`UpgradeHandler`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use texhub_core::config::{RealtimeConfig, ServerConfig};
use texhub_core::result::AppResult;

use crate::metrics::TransportMetrics;

use super::buffer::BufferPool;
use super::handshake::{UpgradeRequest, negotiate};
use super::listener::{BoxedIo, Listener};
use super::request::{Route, parse_head, read_head, route};
use super::response::{write_error, write_status, write_switching_protocols};

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Receives hijacked WebSocket connections.
#[async_trait]
pub trait UpgradeHandler: Send + Sync + 'static {
    /// Drive the connection until it ends. `shutdown` fires when the
    /// server drains.
    async fn on_upgrade(
        &self,
        ws: WebSocketStream<BoxedIo>,
        upgrade: UpgradeRequest,
        shutdown: CancellationToken,
    );
}

/// Accepts sockets and recognises the status check and the upgrade.
pub struct ConnectionServer {
    config: ServerConfig,
    product: String,
    ws_config: WebSocketConfig,
    ready: AtomicBool,
    read_buffers: BufferPool,
    write_buffers: BufferPool,
    tracker: TaskTracker,
    accept_stop: CancellationToken,
    clients: CancellationToken,
    handler: Arc<dyn UpgradeHandler>,
    metrics: Arc<TransportMetrics>,
}

impl std::fmt::Debug for ConnectionServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionServer")
            .field("ready", &self.is_ready())
            .field("connections", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionServer {
    pub fn new(
        config: ServerConfig,
        realtime: &RealtimeConfig,
        handler: Arc<dyn UpgradeHandler>,
        metrics: Arc<TransportMetrics>,
    ) -> Arc<Self> {
        let head_capacity = config.buffer_size * config.max_buffer_fills.max(1);
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(realtime.max_frame_bytes))
            .max_frame_size(Some(realtime.max_frame_bytes));
        Arc::new(Self {
            product: realtime.product_domain.clone(),
            ws_config,
            ready: AtomicBool::new(true),
            read_buffers: BufferPool::new(head_capacity, config.buffer_pool_size),
            write_buffers: BufferPool::new(config.buffer_size, config.buffer_pool_size),
            tracker: TaskTracker::new(),
            accept_stop: CancellationToken::new(),
            clients: CancellationToken::new(),
            handler,
            metrics,
            config,
        })
    }

    /// Whether the status check answers 200.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Connections currently being served.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Accept until [`shutdown`](Self::shutdown) stops the listener.
    pub async fn serve(self: Arc<Self>, listener: Listener) -> AppResult<()> {
        info!(address = %listener.describe(), "Connection server accepting");
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.accept_stop.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((io, peer)) => {
                    let server = Arc::clone(&self);
                    self.tracker.spawn(async move {
                        server.handle_connection(io, peer).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                }
            }
        }
        info!("Connection server stopped accepting");
        Ok(())
    }

    /// Serve one accepted socket to completion.
    pub async fn handle_connection(&self, io: BoxedIo, peer: String) {
        self.metrics.connection_opened();
        debug!(peer = %peer, "Connection accepted");
        self.serve_connection(io).await;
        self.metrics.connection_closed();
        debug!(peer = %peer, "Connection closed");
    }

    async fn serve_connection(&self, mut io: BoxedIo) {
        let mut buf = self.read_buffers.acquire();
        let read = timeout(
            self.config.request_read_timeout(),
            read_head(
                &mut io,
                &mut buf,
                self.config.buffer_size,
                self.config.max_buffer_fills,
            ),
        )
        .await;
        let head_len = match read {
            Ok(Ok(len)) => len,
            Ok(Err(err)) => {
                if let Some(status) = err.status() {
                    self.reject(&mut io, status).await;
                } else {
                    debug!(error = ?err, "Request head not read");
                }
                return;
            }
            Err(_) => {
                debug!("Request head timed out");
                return;
            }
        };

        let Ok(head) = parse_head(&buf[..head_len]) else {
            self.reject(&mut io, 400).await;
            return;
        };

        match route(&head, &self.config.status_path, &self.config.websocket_path) {
            Route::Status { head_only } => {
                TransportMetrics::inc(&self.metrics.status_checks);
                let mut out = self.write_buffers.acquire();
                write_status(&mut out, self.is_ready(), head_only);
                self.write_and_close(&mut io, &out).await;
            }
            Route::MethodNotAllowed => self.reject(&mut io, 405).await,
            Route::Unknown => self.reject(&mut io, 400).await,
            Route::Upgrade if !self.is_ready() => self.reject(&mut io, 503).await,
            Route::Upgrade => match negotiate(&head, &self.product) {
                Ok(upgrade) => {
                    let leftover = buf[head_len..].to_vec();
                    drop(buf);
                    self.hijack(io, upgrade, leftover).await;
                }
                Err(err) => {
                    debug!(error = ?err, "Upgrade refused");
                    self.reject(&mut io, err.status()).await;
                }
            },
        }
    }

    async fn hijack(&self, mut io: BoxedIo, upgrade: UpgradeRequest, leftover: Vec<u8>) {
        let mut out = self.write_buffers.acquire();
        write_switching_protocols(&mut out, &upgrade.accept_key, &upgrade.protocol);
        let written = timeout(self.config.response_write_timeout(), async {
            io.write_all(&out).await?;
            io.flush().await
        })
        .await;
        drop(out);
        if !matches!(written, Ok(Ok(()))) {
            debug!("Upgrade response not written");
            return;
        }

        TransportMetrics::inc(&self.metrics.upgrades);
        let ws =
            WebSocketStream::from_partially_read(io, leftover, Role::Server, Some(self.ws_config))
                .await;
        self.handler
            .on_upgrade(ws, upgrade, self.clients.child_token())
            .await;
    }

    async fn reject(&self, io: &mut BoxedIo, status: u16) {
        TransportMetrics::inc(&self.metrics.requests_rejected);
        let mut out = self.write_buffers.acquire();
        write_error(&mut out, status);
        self.write_and_close(io, &out).await;
    }

    async fn write_and_close(&self, io: &mut BoxedIo, bytes: &[u8]) {
        let result = timeout(self.config.response_write_timeout(), async {
            io.write_all(bytes).await?;
            io.shutdown().await
        })
        .await;
        if !matches!(result, Ok(Ok(()))) {
            debug!("Response not fully written");
        }
    }

    /// Drain the server.
    ///
    /// The status check turns 503 first and accepting continues for the
    /// readiness grace period, so load balancers notice before connections
    /// are refused. Then the listener stops, every client is told to close,
    /// and in-flight connections get until the shutdown grace to finish.
    pub async fn shutdown(&self) {
        self.ready.store(false, Ordering::Release);
        info!("Connection server draining");
        let grace = self.config.readiness_grace();
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        self.accept_stop.cancel();
        self.clients.cancel();
        self.tracker.close();
        if timeout(self.config.shutdown_grace(), self.tracker.wait())
            .await
            .is_err()
        {
            warn!(remaining = self.tracker.len(), "Shutdown grace elapsed with connections open");
        } else {
            info!("All connections drained");
        }
    }
}
