//! Transport and session counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide counters for the connection server.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    /// Connections currently open (any state).
    pub connections_active: AtomicU64,
    /// Connections accepted since start.
    pub connections_accepted: AtomicU64,
    /// Requests answered with a 4xx/5xx and closed.
    pub requests_rejected: AtomicU64,
    /// Status checks answered.
    pub status_checks: AtomicU64,
    /// Successful WebSocket upgrades.
    pub upgrades: AtomicU64,
    /// Bootstraps that joined a room.
    pub bootstraps_ok: AtomicU64,
    /// Bootstraps answered with a rejection frame.
    pub bootstraps_rejected: AtomicU64,
    /// Frames written by the writer pool.
    pub frames_written: AtomicU64,
    /// Lazy-success batch frames written.
    pub lazy_batches: AtomicU64,
    /// Clients disconnected because their write queue filled up.
    pub queue_overflows: AtomicU64,
    /// Pub/sub reconnects.
    pub pubsub_reconnects: AtomicU64,
}

impl TransportMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Increment a counter by one.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            status_checks: self.status_checks.load(Ordering::Relaxed),
            upgrades: self.upgrades.load(Ordering::Relaxed),
            bootstraps_ok: self.bootstraps_ok.load(Ordering::Relaxed),
            bootstraps_rejected: self.bootstraps_rejected.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            lazy_batches: self.lazy_batches.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            pubsub_reconnects: self.pubsub_reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connections_active: u64,
    pub connections_accepted: u64,
    pub requests_rejected: u64,
    pub status_checks: u64,
    pub upgrades: u64,
    pub bootstraps_ok: u64,
    pub bootstraps_rejected: u64,
    pub frames_written: u64,
    pub lazy_batches: u64,
    pub queue_overflows: u64,
    pub pubsub_reconnects: u64,
}
