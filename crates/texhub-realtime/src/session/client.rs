//! Life of one WebSocket client: bootstrap, RPC read loop, teardown.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use texhub_auth::ProjectJwtValidator;
use texhub_core::config::RealtimeConfig;
use texhub_core::error::{AppError, ErrorKind};
use texhub_core::result::AppResult;
use texhub_core::types::{ProjectId, PublicId, UserId};

use crate::connection::{BootstrapPool, WriteQueue, WriteQueueEntry, WriterPool, WsSink};
use crate::message::{
    BootstrapError, BootstrapInfo, BootstrapReply, ConnectedClient, RoomEvent, RoomMessage,
    RpcRequest,
};
use crate::metrics::TransportMetrics;
use crate::presence::PresenceStore;
use crate::transport::{BoxedIo, UpgradeHandler, UpgradeRequest};

use super::room::{ClientEntry, RoomManager};
use super::rpc::{ClientSession, RpcDispatcher, RpcOutcome};

type WsStream = SplitStream<WebSocketStream<BoxedIo>>;

fn close_frame(code: CloseCode, reason: &str) -> CloseFrame {
    CloseFrame {
        code,
        reason: reason.to_string().into(),
    }
}

/// Session-layer handler for hijacked connections.
#[derive(Debug)]
pub struct RealtimeHandler {
    config: RealtimeConfig,
    validator: Arc<ProjectJwtValidator>,
    bootstraps: Arc<BootstrapPool>,
    writers: Arc<WriterPool>,
    rooms: Arc<RoomManager>,
    presence: PresenceStore,
    rpc: Arc<RpcDispatcher>,
    metrics: Arc<TransportMetrics>,
}

impl RealtimeHandler {
    /// Wire the handler to the shared pools and stores built at startup.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RealtimeConfig,
        validator: Arc<ProjectJwtValidator>,
        bootstraps: Arc<BootstrapPool>,
        writers: Arc<WriterPool>,
        rooms: Arc<RoomManager>,
        presence: PresenceStore,
        rpc: Arc<RpcDispatcher>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            config,
            validator,
            bootstraps,
            writers,
            rooms,
            presence,
            rpc,
            metrics,
        }
    }

    /// Validate the token and join the room on a bootstrap worker, then
    /// queue the bootstrap reply.
    async fn bootstrap(
        &self,
        public_id: PublicId,
        token: String,
        queue: &Arc<WriteQueue>,
    ) -> AppResult<ClientSession> {
        let validator = Arc::clone(&self.validator);
        let rooms = Arc::clone(&self.rooms);
        let presence = self.presence.clone();
        let client_queue = Arc::clone(queue);

        let (claims, connected_clients) = self
            .bootstraps
            .submit(move |_| async move {
                let claims = validator.validate(&token).await?;
                let connected = enter_room(
                    &rooms,
                    &presence,
                    public_id,
                    claims.project_id,
                    claims.user_id,
                    client_queue,
                )
                .await?;
                Ok((claims, connected))
            })
            .await?;

        let reply = BootstrapReply {
            bootstrap: BootstrapInfo {
                public_id,
                project_id: claims.project_id,
                user_id: claims.user_id,
                privilege_level: claims.privilege_level,
                connected_clients,
            },
        };
        queue.push_frame(Message::text(serde_json::to_string(&reply)?))?;
        Ok(ClientSession::new(public_id, claims, Arc::clone(queue)))
    }

    /// Send the one terminal rejection frame and close. A client that got
    /// as far as the room join is also removed from presence.
    async fn reject(&self, public_id: PublicId, queue: &Arc<WriteQueue>, err: &AppError) {
        TransportMetrics::inc(&self.metrics.bootstraps_rejected);
        info!(public_id = %public_id, error = %err, retryable = err.is_retryable(), "Bootstrap rejected");

        let code = if err.is_retryable() {
            CloseCode::Again
        } else {
            CloseCode::Policy
        };
        let queued = serde_json::to_string(&BootstrapError::from(err))
            .map_err(AppError::from)
            .and_then(|text| queue.push_frame(Message::text(text)))
            .and_then(|_| {
                queue.push(WriteQueueEntry::Close(Some(close_frame(code, "bootstrap failed"))))
            });
        if queued.is_ok() {
            let _ = timeout(self.config.write_timeout(), queue.cancel_token().cancelled()).await;
        }
        queue.cancel_token().cancel();

        if let Some(entry) = self.rooms.leave(public_id).await {
            forget(&self.rooms, &self.presence, entry.project_id, public_id).await;
        }
    }

    /// Read RPCs until the connection ends. Returns the close frame to
    /// send, if the server is the side closing.
    async fn read_loop(
        &self,
        session: &ClientSession,
        mut stream: WsStream,
        shutdown: &CancellationToken,
    ) -> Option<CloseFrame> {
        let idle = self.config.idle_timeout();
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return Some(close_frame(CloseCode::Away, "server shutting down"));
                }
                _ = session.queue.cancel_token().cancelled() => return None,
                next = timeout(idle, stream.next()) => next,
            };
            let message = match next {
                Err(_) => {
                    debug!(public_id = %session.public_id, "Client idle");
                    return Some(close_frame(CloseCode::Away, "idle timeout"));
                }
                Ok(None) => return None,
                Ok(Some(Err(e))) => {
                    debug!(public_id = %session.public_id, error = %e, "Client read failed");
                    return None;
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    let request: RpcRequest = match serde_json::from_str(text.as_str()) {
                        Ok(request) => request,
                        Err(e) => {
                            debug!(public_id = %session.public_id, error = %e, "Malformed RPC");
                            return Some(close_frame(CloseCode::Invalid, "malformed RPC"));
                        }
                    };
                    if self.rpc.handle(session, request).await == RpcOutcome::Leave {
                        return Some(close_frame(CloseCode::Normal, "left project"));
                    }
                }
                Message::Close(_) => return None,
                // Pings, pongs and binary frames only keep the connection alive.
                _ => {}
            }
        }
    }

    async fn teardown(&self, session: &ClientSession, close: Option<CloseFrame>) {
        let queue = &session.queue;
        let closing = close.is_some_and(|frame| queue.push(WriteQueueEntry::Close(Some(frame))).is_ok());
        if closing {
            let _ = timeout(self.config.write_timeout(), queue.cancel_token().cancelled()).await;
        }
        queue.cancel_token().cancel();

        let project_id = session.claims.project_id;
        self.rooms.leave(session.public_id).await;
        forget(&self.rooms, &self.presence, project_id, session.public_id).await;
        debug!(public_id = %session.public_id, "Client gone");
    }
}

/// Join the room, record presence and announce the client. Returns the
/// project's connected clients, the new one included.
async fn enter_room(
    rooms: &RoomManager,
    presence: &PresenceStore,
    public_id: PublicId,
    project_id: ProjectId,
    user_id: UserId,
    queue: Arc<WriteQueue>,
) -> AppResult<Vec<ConnectedClient>> {
    let gone = queue.cancel_token().clone();
    rooms
        .join(
            public_id,
            ClientEntry {
                project_id,
                user_id,
                queue,
            },
        )
        .await?;
    // The caller may have given up (hard limit) or the queue may have been
    // closed by fan-out; undo whatever got recorded so no ghost stays behind.
    if gone.is_cancelled() {
        return Err(abandon(rooms, presence, project_id, public_id).await);
    }

    let me = ConnectedClient {
        public_id,
        user_id,
        doc_id: None,
        row: None,
        column: None,
        last_updated_at: chrono::Utc::now().timestamp(),
    };
    if let Err(e) = presence.set(project_id, &me).await {
        warn!(project_id = %project_id, error = %e, "Presence not recorded");
    }
    if gone.is_cancelled() {
        return Err(abandon(rooms, presence, project_id, public_id).await);
    }
    let connected = match presence.list(project_id).await {
        Ok(clients) => clients,
        Err(e) => {
            warn!(project_id = %project_id, error = %e, "Presence not listed");
            vec![me.clone()]
        }
    };
    if gone.is_cancelled() {
        return Err(abandon(rooms, presence, project_id, public_id).await);
    }
    let joined = RoomMessage {
        source: Some(public_id),
        event: RoomEvent::ClientUpdated(me),
    };
    if let Err(e) = rooms.publish(project_id, &joined).await {
        warn!(project_id = %project_id, error = %e, "Join not announced");
    }
    Ok(connected)
}

/// Drop a client from presence and tell the room it left.
async fn forget(rooms: &RoomManager, presence: &PresenceStore, project_id: ProjectId, public_id: PublicId) {
    if let Err(e) = presence.remove(project_id, public_id).await {
        warn!(project_id = %project_id, error = %e, "Presence not cleared");
    }
    let left = RoomMessage {
        source: Some(public_id),
        event: RoomEvent::ClientDisconnected { public_id },
    };
    if let Err(e) = rooms.publish(project_id, &left).await {
        warn!(project_id = %project_id, error = %e, "Disconnect not announced");
    }
}

/// Undo a bootstrap whose client went away mid-join.
async fn abandon(
    rooms: &RoomManager,
    presence: &PresenceStore,
    project_id: ProjectId,
    public_id: PublicId,
) -> AppError {
    // A concurrent reject may already have left the room but raced our
    // presence write, so presence is cleared either way.
    rooms.leave(public_id).await;
    forget(rooms, presence, project_id, public_id).await;
    AppError::service_unavailable("Client closed during bootstrap")
}

#[async_trait]
impl UpgradeHandler for RealtimeHandler {
    async fn on_upgrade(
        &self,
        ws: WebSocketStream<BoxedIo>,
        upgrade: UpgradeRequest,
        shutdown: CancellationToken,
    ) {
        let (sink, stream) = ws.split();
        let sink: WsSink = Box::pin(
            sink.sink_map_err(|e| AppError::with_source(ErrorKind::Io, "WebSocket write failed", e)),
        );
        let queue = self.writers.queue(sink, CancellationToken::new());
        let public_id = PublicId::new();

        let session = match self.bootstrap(public_id, upgrade.bootstrap, &queue).await {
            Ok(session) => session,
            Err(e) => {
                self.reject(public_id, &queue, &e).await;
                return;
            }
        };
        TransportMetrics::inc(&self.metrics.bootstraps_ok);
        info!(
            public_id = %public_id,
            project_id = %session.claims.project_id,
            user_id = %session.claims.user_id,
            protocol = %upgrade.protocol,
            "Client bootstrapped"
        );

        let close = self.read_loop(&session, stream, &shutdown).await;
        self.teardown(&session, close).await;
    }
}
