//! Local room membership and fan-out of room events.
//!
//! Two maps, linked by ids only: rooms know the public ids of their local
//! members, the client registry knows each client's project and write
//! queue. The first local member subscribes the process to the room
//! channel; the last one to leave unsubscribes it.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use texhub_core::error::AppError;
use texhub_core::result::AppResult;
use texhub_core::types::{ProjectId, PublicId, UserId};

use crate::channel::{ChannelEvent, ChannelManager};
use crate::connection::{WriteQueue, WriteQueueEntry};
use crate::message::{RoomEvent, RoomMessage};

/// A locally connected, bootstrapped client.
#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub queue: Arc<WriteQueue>,
}

#[derive(Debug, Default)]
struct Room {
    members: HashSet<PublicId>,
    subscribed: bool,
    /// Set once the last member left; a closed room is already gone from
    /// the map and must not be joined.
    closed: bool,
}

/// Registry of local clients and the rooms they are in.
#[derive(Debug)]
pub struct RoomManager {
    rooms: DashMap<ProjectId, Arc<Mutex<Room>>>,
    clients: DashMap<PublicId, ClientEntry>,
    channels: Arc<ChannelManager>,
}

impl RoomManager {
    /// Empty registry. Call [`RoomManager::run`] to start routing channel events.
    pub fn new(channels: Arc<ChannelManager>) -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            clients: DashMap::new(),
            channels,
        })
    }

    /// Number of local clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of rooms with local members.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn client(&self, public_id: PublicId) -> Option<ClientEntry> {
        self.clients.get(&public_id).map(|c| c.value().clone())
    }

    /// Add a client to its project's room, subscribing the process to the
    /// room channel if it is the first local member.
    pub async fn join(&self, public_id: PublicId, entry: ClientEntry) -> AppResult<()> {
        let project_id = entry.project_id;
        loop {
            let room = Arc::clone(
                self.rooms
                    .entry(project_id)
                    .or_insert_with(|| Arc::new(Mutex::new(Room::default())))
                    .value(),
            );
            let mut state = room.lock().await;
            if state.closed {
                continue;
            }

            state.members.insert(public_id);
            self.clients.insert(public_id, entry.clone());
            if !state.subscribed {
                if let Err(e) = self.channels.subscribe(project_id).await {
                    state.members.remove(&public_id);
                    self.clients.remove(&public_id);
                    if state.members.is_empty() {
                        state.closed = true;
                        self.rooms.remove_if(&project_id, |_, r| Arc::ptr_eq(r, &room));
                    }
                    return Err(e);
                }
                state.subscribed = true;
                info!(project_id = %project_id, "Room opened");
            }
            debug!(project_id = %project_id, public_id = %public_id, members = state.members.len(), "Client joined room");
            drop(state);

            // The connection may have ended while the join was in flight;
            // its own leave could then have run before the insert above.
            if entry.queue.cancel_token().is_cancelled() {
                self.leave(public_id).await;
                return Err(AppError::service_unavailable("Client disconnected during join"));
            }
            return Ok(());
        }
    }

    /// Remove a client. Unsubscribes the room channel when the room is
    /// left empty. Returns the removed entry, if the client was joined.
    pub async fn leave(&self, public_id: PublicId) -> Option<ClientEntry> {
        let (_, entry) = self.clients.remove(&public_id)?;
        let project_id = entry.project_id;
        let room = self.rooms.get(&project_id).map(|r| Arc::clone(r.value()))?;
        let mut state = room.lock().await;
        state.members.remove(&public_id);
        if state.members.is_empty() && !state.closed {
            state.closed = true;
            self.rooms.remove_if(&project_id, |_, r| Arc::ptr_eq(r, &room));
            if let Err(e) = self.channels.unsubscribe(project_id).await {
                warn!(project_id = %project_id, error = %e, "Room unsubscribe failed");
            }
            info!(project_id = %project_id, "Room closed");
        }
        Some(entry)
    }

    /// Publish a room event to every process serving the room.
    pub async fn publish(&self, project_id: ProjectId, message: &RoomMessage) -> AppResult<()> {
        let payload = serde_json::to_vec(message)?;
        self.channels.publish(project_id, Bytes::from(payload)).await
    }

    /// Deliver channel events to local members until cancelled or the
    /// channel manager stops.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ChannelEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(ChannelEvent::Message { room_id, payload }) => {
                    self.deliver(room_id, &payload).await;
                }
                Some(ChannelEvent::Drained { room_id }) => self.on_drained(room_id).await,
                None => break,
            }
        }
        debug!("Room dispatcher stopped");
    }

    async fn members(&self, project_id: ProjectId) -> Vec<PublicId> {
        let Some(room) = self.rooms.get(&project_id).map(|r| Arc::clone(r.value())) else {
            return Vec::new();
        };
        let state = room.lock().await;
        state.members.iter().copied().collect()
    }

    async fn deliver(&self, project_id: ProjectId, payload: &[u8]) {
        let message: RoomMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Dropping malformed room message");
                return;
            }
        };
        let frame = match serde_json::to_string(&message.event) {
            Ok(text) => Message::text(text),
            Err(e) => {
                warn!(error = %e, "Room event not serialisable");
                return;
            }
        };

        let members = self.members(project_id).await;
        for public_id in members {
            if message.source == Some(public_id) {
                continue;
            }
            let Some(client) = self.client(public_id) else {
                continue;
            };
            let delivered = match &message.event {
                RoomEvent::ForceDisconnect { user_id, reason } => {
                    if user_id.is_some_and(|u| u != client.user_id) {
                        continue;
                    }
                    info!(public_id = %public_id, reason = %reason, "Disconnecting client");
                    client.queue.push_frame(frame.clone()).and_then(|_| {
                        client.queue.push(WriteQueueEntry::Close(Some(CloseFrame {
                            code: CloseCode::Policy,
                            reason: reason.clone().into(),
                        })))
                    })
                }
                _ => client.queue.push_frame(frame.clone()),
            };
            if let Err(e) = delivered {
                debug!(public_id = %public_id, error = %e, "Room event not queued");
            }
        }
    }

    async fn on_drained(&self, project_id: ProjectId) {
        let Some(room) = self.rooms.get(&project_id).map(|r| Arc::clone(r.value())) else {
            return;
        };
        let state = room.lock().await;
        if state.closed || state.members.is_empty() {
            return;
        }
        // The room was reopened while its old subscription was draining.
        if let Err(e) = self.channels.subscribe(project_id).await {
            warn!(project_id = %project_id, error = %e, "Room resubscribe failed");
        }
    }
}
