//! RPC dispatch for bootstrapped clients.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::time::{Instant, timeout};
use tracing::debug;

use texhub_auth::ProjectJwtClaims;
use texhub_core::error::AppError;
use texhub_core::result::AppResult;
use texhub_core::traits::DocumentService;
use texhub_core::types::{DocId, PublicId};

use crate::connection::{WriteQueue, WriteQueueEntry};
use crate::message::{ConnectedClient, RoomEvent, RoomMessage, RpcRequest, RpcResponse};
use crate::presence::PresenceStore;

use super::room::RoomManager;

/// State of one bootstrapped connection.
#[derive(Debug)]
pub struct ClientSession {
    pub public_id: PublicId,
    pub claims: ProjectJwtClaims,
    pub queue: Arc<WriteQueue>,
    current_doc: Mutex<Option<DocId>>,
}

impl ClientSession {
    /// Session for a client that has not opened a document yet.
    pub fn new(public_id: PublicId, claims: ProjectJwtClaims, queue: Arc<WriteQueue>) -> Self {
        Self {
            public_id,
            claims,
            queue,
            current_doc: Mutex::new(None),
        }
    }

    /// Document the client last joined.
    pub fn current_doc(&self) -> Option<DocId> {
        self.current_doc.lock().ok().and_then(|d| *d)
    }

    fn set_current_doc(&self, doc_id: Option<DocId>) {
        if let Ok(mut current) = self.current_doc.lock() {
            *current = doc_id;
        }
    }
}

/// What the read loop does after an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcOutcome {
    Continue,
    /// The client asked to leave; close the connection.
    Leave,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocBody {
    doc_id: DocId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody {
    doc_id: DocId,
    update: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionBody {
    #[serde(default)]
    doc_id: Option<DocId>,
    row: u32,
    column: u32,
}

fn parse_body<T: DeserializeOwned>(body: Value) -> AppResult<T> {
    serde_json::from_value(body).map_err(|e| AppError::validation(format!("Invalid RPC body: {e}")))
}

/// Executes client RPCs and queues their responses.
#[derive(Debug)]
pub struct RpcDispatcher {
    rooms: Arc<RoomManager>,
    presence: PresenceStore,
    documents: Arc<dyn DocumentService>,
    rpc_timeout: Duration,
}

impl RpcDispatcher {
    pub fn new(
        rooms: Arc<RoomManager>,
        presence: PresenceStore,
        documents: Arc<dyn DocumentService>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            rooms,
            presence,
            documents,
            rpc_timeout,
        }
    }

    /// Run one RPC under the RPC deadline and queue its answer.
    ///
    /// Successes without a payload are acknowledged lazily; requests
    /// without a callback get no answer at all.
    pub async fn handle(&self, session: &ClientSession, request: RpcRequest) -> RpcOutcome {
        let started = Instant::now();
        let action = request.action;
        let result = match timeout(self.rpc_timeout, self.dispatch(session, &action, request.body)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::deadline_exceeded(format!("RPC {action} timed out"))),
        };

        let (answer, outcome) = match result {
            Ok((body, outcome)) => (
                request.callback.map(|callback| match body {
                    Some(body) => WriteQueueEntry::Rpc(RpcResponse::ok(
                        callback,
                        body,
                        started.elapsed().as_millis() as u64,
                    )),
                    None => WriteQueueEntry::LazySuccess(callback),
                }),
                outcome,
            ),
            Err(e) => {
                debug!(public_id = %session.public_id, action = %action, error = %e, "RPC failed");
                (
                    request
                        .callback
                        .map(|callback| WriteQueueEntry::Rpc(RpcResponse::failed(callback, &e))),
                    RpcOutcome::Continue,
                )
            }
        };

        if let Some(Err(e)) = answer.map(|answer| session.queue.push(answer)) {
            debug!(public_id = %session.public_id, error = %e, "RPC answer not queued");
        }
        outcome
    }

    async fn dispatch(
        &self,
        session: &ClientSession,
        action: &str,
        body: Value,
    ) -> AppResult<(Option<Value>, RpcOutcome)> {
        let project_id = session.claims.project_id;
        match action {
            "ping" => Ok((None, RpcOutcome::Continue)),
            "joinDoc" => {
                let DocBody { doc_id } = parse_body(body)?;
                let snapshot = self.documents.get_doc(project_id, doc_id).await?;
                session.set_current_doc(Some(doc_id));
                Ok((Some(json!({ "doc": snapshot })), RpcOutcome::Continue))
            }
            "leaveDoc" => {
                let DocBody { doc_id } = parse_body(body)?;
                if session.current_doc() == Some(doc_id) {
                    session.set_current_doc(None);
                }
                Ok((None, RpcOutcome::Continue))
            }
            "applyUpdate" => {
                if !session.claims.privilege_level.can_write() {
                    return Err(AppError::not_authorized("Read-only access to this project"));
                }
                let UpdateBody { doc_id, update } = parse_body(body)?;
                self.documents
                    .apply_update(project_id, doc_id, update.clone())
                    .await?;
                self.rooms
                    .publish(
                        project_id,
                        &RoomMessage {
                            source: Some(session.public_id),
                            event: RoomEvent::Update { doc_id, update },
                        },
                    )
                    .await?;
                Ok((None, RpcOutcome::Continue))
            }
            "clientTracking.updatePosition" => {
                let position: PositionBody = parse_body(body)?;
                let client = ConnectedClient {
                    public_id: session.public_id,
                    user_id: session.claims.user_id,
                    doc_id: position.doc_id.or_else(|| session.current_doc()),
                    row: Some(position.row),
                    column: Some(position.column),
                    last_updated_at: chrono::Utc::now().timestamp(),
                };
                self.presence.set(project_id, &client).await?;
                self.rooms
                    .publish(
                        project_id,
                        &RoomMessage {
                            source: Some(session.public_id),
                            event: RoomEvent::ClientUpdated(client),
                        },
                    )
                    .await?;
                Ok((None, RpcOutcome::Continue))
            }
            "clientTracking.getConnectedUsers" => {
                let clients = self.presence.list(project_id).await?;
                Ok((Some(serde_json::to_value(clients)?), RpcOutcome::Continue))
            }
            "leaveProject" => Ok((None, RpcOutcome::Leave)),
            other => Err(AppError::validation(format!("Unknown RPC action: {other}"))),
        }
    }
}
