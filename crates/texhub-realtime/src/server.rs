//! Top-level real-time engine that ties together all subsystems.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use texhub_auth::ProjectJwtValidator;
use texhub_cache::{DocumentLock, EpochCache};
use texhub_core::config::AppConfig;
use texhub_core::result::AppResult;
use texhub_core::traits::{CacheProvider, DocumentService, EpochSource};

use crate::bridge::PubSubBackend;
use crate::channel::ChannelManager;
use crate::connection::{BootstrapPool, WriterPool};
use crate::metrics::TransportMetrics;
use crate::presence::PresenceStore;
use crate::session::{AccessRevoker, RealtimeHandler, RoomManager, RpcDispatcher};
use crate::transport::{ConnectionServer, Listener};

const BACKGROUND_DRAIN: Duration = Duration::from_secs(5);

/// External collaborators the engine runs against.
#[derive(Debug, Clone)]
pub struct EngineDeps {
    /// Shared cache for locks, epochs, and presence.
    pub cache: Arc<dyn CacheProvider>,
    /// Authoritative epochs in the primary datastore.
    pub epoch_source: Arc<dyn EpochSource>,
    /// Cross-process room fan-out.
    pub pubsub: Arc<dyn PubSubBackend>,
    /// Document-updater client.
    pub documents: Arc<dyn DocumentService>,
}

/// Central real-time engine that coordinates all subsystems.
pub struct RealtimeEngine {
    /// Raw connection server.
    pub server: Arc<ConnectionServer>,
    /// Room membership and fan-out.
    pub rooms: Arc<RoomManager>,
    /// Room-level pub/sub.
    pub channels: Arc<ChannelManager>,
    /// Epoch bumps with forced disconnects.
    pub revoker: AccessRevoker,
    /// Transport counters.
    pub metrics: Arc<TransportMetrics>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("clients", &self.rooms.client_count())
            .field("rooms", &self.rooms.room_count())
            .finish()
    }
}

impl RealtimeEngine {
    /// Build every subsystem and start the background workers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: &AppConfig, deps: EngineDeps) -> AppResult<Self> {
        let metrics = Arc::new(TransportMetrics::new());
        let tasks = TaskTracker::new();
        let cancel = CancellationToken::new();

        let (channels, events) = ChannelManager::start(
            &config.realtime,
            deps.pubsub,
            Arc::clone(&metrics),
            &tasks,
            cancel.clone(),
        );
        let rooms = RoomManager::new(Arc::clone(&channels));
        tasks.spawn(Arc::clone(&rooms).run(events, cancel.clone()));

        let writers = WriterPool::start(&config.realtime, Arc::clone(&metrics), &tasks, cancel.clone());
        let bootstraps = BootstrapPool::start(&config.realtime, &tasks, cancel.clone());

        let epochs = EpochCache::new(Arc::clone(&deps.cache), config.epoch.clone());
        let validator = Arc::new(ProjectJwtValidator::new(
            &config.auth,
            epochs.clone(),
            Arc::clone(&deps.epoch_source),
        )?);
        let presence = PresenceStore::new(Arc::clone(&deps.cache), config.realtime.presence_ttl());
        let rpc = Arc::new(RpcDispatcher::new(
            Arc::clone(&rooms),
            presence.clone(),
            deps.documents,
            config.realtime.rpc_timeout(),
        ));
        let handler = Arc::new(RealtimeHandler::new(
            config.realtime.clone(),
            validator,
            bootstraps,
            writers,
            Arc::clone(&rooms),
            presence,
            rpc,
            Arc::clone(&metrics),
        ));
        let server = ConnectionServer::new(
            config.server.clone(),
            &config.realtime,
            handler,
            Arc::clone(&metrics),
        );
        let revoker = AccessRevoker::new(
            DocumentLock::new(Arc::clone(&deps.cache), config.lock.clone()),
            epochs,
            deps.epoch_source,
            Arc::clone(&rooms),
        );

        info!(
            writers = config.realtime.writer_workers,
            bootstraps = config.realtime.bootstrap_workers,
            "Real-time engine initialized"
        );

        Ok(Self {
            server,
            rooms,
            channels,
            revoker,
            metrics,
            tasks,
            cancel,
        })
    }

    /// Accept connections until [`shutdown`](Self::shutdown).
    pub async fn serve(&self, listener: Listener) -> AppResult<()> {
        Arc::clone(&self.server).serve(listener).await
    }

    /// Drain clients, then stop the background workers.
    ///
    /// Workers outlive the connection server so departing clients can
    /// still flush their close frames and leave their rooms.
    pub async fn shutdown(&self) {
        info!("Shutting down real-time engine");
        self.server.shutdown().await;

        self.cancel.cancel();
        self.tasks.close();
        if timeout(BACKGROUND_DRAIN, self.tasks.wait()).await.is_err() {
            warn!(remaining = self.tasks.len(), "Background workers still running");
        }
        info!(metrics = ?self.metrics.snapshot(), "Real-time engine shut down");
    }
}
