//! Multiplexed room subscriptions.
//!
//! One receive loop owns the single subscription connection of this
//! process. Subscribe and unsubscribe requests reach it through a command
//! queue, so joining and leaving rooms never spawns per-room tasks. On
//! connection loss the loop reconnects with capped exponential backoff and
//! resubscribes every room it still holds.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use texhub_core::config::RealtimeConfig;
use texhub_core::error::AppError;
use texhub_core::result::AppResult;
use texhub_core::retry::{Backoff, Clock, TokioClock};
use texhub_core::types::ProjectId;

use crate::bridge::{BackendEvent, PubSubBackend, PubSubConnection};
use crate::metrics::TransportMetrics;

use super::naming;

/// Buffered room events between the receive loop and the dispatcher.
const EVENT_BUFFER: usize = 4096;

/// Something that happened on a room channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A payload published to the room.
    Message { room_id: ProjectId, payload: Bytes },
    /// The backend confirmed the room's channel is no longer subscribed.
    Drained { room_id: ProjectId },
}

enum Command {
    Subscribe(ProjectId, oneshot::Sender<AppResult<()>>),
    Unsubscribe(ProjectId, oneshot::Sender<AppResult<()>>),
}

/// Room-level pub/sub on top of a [`PubSubBackend`].
#[derive(Debug)]
pub struct ChannelManager {
    base: String,
    backend: Arc<dyn PubSubBackend>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelManager {
    /// Start the receive loop.
    ///
    /// Returns the manager and the stream of room events. The loop stops
    /// when `cancel` fires, when the backend reports a terminal close, or
    /// when the event receiver is dropped.
    pub fn start(
        config: &RealtimeConfig,
        backend: Arc<dyn PubSubBackend>,
        metrics: Arc<TransportMetrics>,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<ChannelEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::channel(EVENT_BUFFER);
        let manager = Arc::new(Self {
            base: config.base_channel.clone(),
            backend: Arc::clone(&backend),
            commands,
        });

        let receive_loop = ReceiveLoop {
            base: config.base_channel.clone(),
            backend,
            backoff: Backoff::exponential(
                Duration::from_millis(config.reconnect_initial_ms),
                Duration::from_millis(config.reconnect_max_ms),
            ),
            clock: Arc::new(TokioClock),
            metrics,
            events,
            channels: HashSet::new(),
        };
        tracker.spawn(receive_loop.run(command_rx, cancel));

        (manager, event_rx)
    }

    /// Subscribe this process to a room.
    pub async fn subscribe(&self, room_id: ProjectId) -> AppResult<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Subscribe(room_id, ack))?;
        done.await
            .map_err(|_| AppError::service_unavailable("channel manager stopped"))?
    }

    /// Unsubscribe this process from a room.
    pub async fn unsubscribe(&self, room_id: ProjectId) -> AppResult<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Unsubscribe(room_id, ack))?;
        done.await
            .map_err(|_| AppError::service_unavailable("channel manager stopped"))?
    }

    /// Publish a payload to every process subscribed to a room.
    pub async fn publish(&self, room_id: ProjectId, payload: Bytes) -> AppResult<()> {
        self.backend
            .publish(&naming::channel_name(&self.base, room_id), payload)
            .await
    }

    fn send(&self, command: Command) -> AppResult<()> {
        self.commands
            .send(command)
            .map_err(|_| AppError::service_unavailable("channel manager stopped"))
    }
}

enum Step {
    Stop,
    Command(Command),
    Event(BackendEvent),
    Lost(AppError),
}

struct ReceiveLoop {
    base: String,
    backend: Arc<dyn PubSubBackend>,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
    metrics: Arc<TransportMetrics>,
    events: mpsc::Sender<ChannelEvent>,
    /// Channels that should be subscribed, across reconnects.
    channels: HashSet<String>,
}

impl ReceiveLoop {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        let mut conn: Option<Box<dyn PubSubConnection>> = None;
        let mut failures: u32 = 0;

        loop {
            if conn.is_none() {
                match self.reconnect(&cancel).await {
                    Ok(Some(fresh)) => {
                        if failures > 0 {
                            TransportMetrics::inc(&self.metrics.pubsub_reconnects);
                        }
                        failures = 0;
                        conn = Some(fresh);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, attempt = failures, "Pub/sub connect failed");
                        if !self.pause(failures, &cancel).await {
                            break;
                        }
                        failures = failures.saturating_add(1);
                    }
                }
                continue;
            }
            let Some(active) = conn.as_mut() else {
                continue;
            };

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Stop,
                command = commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Stop,
                },
                event = active.next_event() => match event {
                    None => {
                        info!("Pub/sub backend closed");
                        Step::Stop
                    }
                    Some(Ok(event)) => Step::Event(event),
                    Some(Err(e)) => Step::Lost(e),
                },
            };

            match step {
                Step::Stop => break,
                Step::Command(command) => {
                    if let Err(e) = self.apply(active.as_mut(), command).await {
                        warn!(error = %e, "Pub/sub command failed, reconnecting");
                        conn = None;
                        failures = failures.saturating_add(1);
                    }
                }
                Step::Event(event) => {
                    if !self.forward(event).await {
                        break;
                    }
                }
                Step::Lost(e) => {
                    warn!(error = %e, "Pub/sub connection lost");
                    conn = None;
                    if !self.pause(failures, &cancel).await {
                        break;
                    }
                    failures = failures.saturating_add(1);
                }
            }
        }
        debug!("Pub/sub receive loop stopped");
    }

    /// Connect and resubscribe everything. `Ok(None)` when cancelled.
    async fn reconnect(
        &self,
        cancel: &CancellationToken,
    ) -> AppResult<Option<Box<dyn PubSubConnection>>> {
        let mut fresh = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            conn = self.backend.connect() => conn?,
        };
        for channel in &self.channels {
            fresh.subscribe(channel).await?;
        }
        if !self.channels.is_empty() {
            info!(channels = self.channels.len(), "Resubscribed room channels");
        }
        Ok(Some(fresh))
    }

    /// Sleep out a backoff delay. `false` when cancelled.
    async fn pause(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = self.clock.sleep(self.backoff.delay(attempt)) => true,
        }
    }

    /// Run a command. An `Err` means the connection is unusable; the
    /// caller has already been answered.
    async fn apply(&mut self, conn: &mut dyn PubSubConnection, command: Command) -> AppResult<()> {
        match command {
            Command::Subscribe(room_id, ack) => {
                let channel = naming::channel_name(&self.base, room_id);
                match conn.subscribe(&channel).await {
                    Ok(()) => {
                        self.channels.insert(channel);
                        let _ = ack.send(Ok(()));
                        Ok(())
                    }
                    Err(e) => {
                        let _ = ack.send(Err(e.clone()));
                        Err(e)
                    }
                }
            }
            Command::Unsubscribe(room_id, ack) => {
                let channel = naming::channel_name(&self.base, room_id);
                self.channels.remove(&channel);
                let result = conn.unsubscribe(&channel).await;
                let _ = ack.send(Ok(()));
                if let Err(e) = result {
                    // The reconnect drops the channel anyway; no ack will come.
                    let _ = self.events.send(ChannelEvent::Drained { room_id }).await;
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    /// Hand an event to the dispatcher. `false` once nobody listens.
    async fn forward(&self, event: BackendEvent) -> bool {
        let (channel, event) = match event {
            BackendEvent::Message { channel, payload } => match naming::room_id(&self.base, &channel) {
                Some(room_id) => (channel, ChannelEvent::Message { room_id, payload }),
                None => {
                    debug!(channel = %channel, "Ignoring message on unknown channel");
                    return true;
                }
            },
            BackendEvent::Unsubscribed { channel } => match naming::room_id(&self.base, &channel) {
                Some(room_id) => (channel, ChannelEvent::Drained { room_id }),
                None => return true,
            },
        };
        if self.events.send(event).await.is_err() {
            debug!(channel = %channel, "Event receiver dropped");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MemoryPubSub;

    fn config() -> RealtimeConfig {
        RealtimeConfig {
            reconnect_initial_ms: 10,
            reconnect_max_ms: 100,
            ..RealtimeConfig::default()
        }
    }

    fn start(
        pubsub: &MemoryPubSub,
    ) -> (Arc<ChannelManager>, mpsc::Receiver<ChannelEvent>, CancellationToken) {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (manager, events) = ChannelManager::start(
            &config(),
            Arc::new(pubsub.clone()),
            Arc::new(TransportMetrics::new()),
            &tracker,
            cancel.clone(),
        );
        (manager, events, cancel)
    }

    #[tokio::test]
    async fn test_publish_subscribe_unsubscribe() {
        let pubsub = MemoryPubSub::new();
        let (manager, mut events, cancel) = start(&pubsub);
        let room = ProjectId::new();

        manager.subscribe(room).await.unwrap();
        manager
            .publish(room, Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Message {
                room_id: room,
                payload: Bytes::from_static(b"{}")
            }
        );

        manager.unsubscribe(room).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Drained { room_id: room }
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_one_connection_for_many_rooms() {
        let pubsub = MemoryPubSub::new();
        let (manager, _events, cancel) = start(&pubsub);
        let rooms: Vec<ProjectId> = (0..50).map(|_| ProjectId::new()).collect();
        for room in &rooms {
            manager.subscribe(*room).await.unwrap();
        }
        for room in &rooms {
            let channel = naming::channel_name("editor-events", *room);
            assert_eq!(pubsub.subscriber_count(&channel), 1);
        }
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_connection_loss() {
        let pubsub = MemoryPubSub::new();
        let (manager, mut events, cancel) = start(&pubsub);
        let room = ProjectId::new();
        manager.subscribe(room).await.unwrap();

        pubsub.refuse_connections(true);
        pubsub.drop_connections();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pubsub.refuse_connections(false);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let channel = naming::channel_name("editor-events", room);
        assert_eq!(pubsub.subscriber_count(&channel), 1);
        manager
            .publish(room, Bytes::from_static(b"again"))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Message {
                room_id: room,
                payload: Bytes::from_static(b"again")
            }
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_backend_close_is_terminal() {
        let pubsub = MemoryPubSub::new();
        let (manager, mut events, _cancel) = start(&pubsub);
        manager.subscribe(ProjectId::new()).await.unwrap();
        pubsub.close();
        assert!(events.recv().await.is_none());
        assert!(manager.subscribe(ProjectId::new()).await.is_err());
    }
}
