//! Real-time session layer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session, room, and write-path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Base pub/sub channel; rooms publish on `<base>:<hex-id>`.
    #[serde(default = "default_base_channel")]
    pub base_channel: String,
    /// Product domain used in the negotiated subprotocol
    /// (`vN.real-time.<product_domain>`).
    #[serde(default = "default_product_domain")]
    pub product_domain: String,
    /// Maximum queued entries per client before it is disconnected.
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
    /// Number of writer workers draining client queues.
    #[serde(default = "default_writer_workers")]
    pub writer_workers: usize,
    /// Maximum lazy-success acknowledgements coalesced into one frame.
    #[serde(default = "default_lazy_batch")]
    pub lazy_success_batch_max: usize,
    /// Deadline for writing one batch of frames, in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    /// Number of bootstrap workers.
    #[serde(default = "default_bootstrap_workers")]
    pub bootstrap_workers: usize,
    /// Maximum queued bootstraps before new ones are rejected.
    #[serde(default = "default_bootstrap_queue")]
    pub bootstrap_queue_size: usize,
    /// Soft limit on the oldest queued bootstrap, in milliseconds.
    #[serde(default = "default_bootstrap_soft")]
    pub bootstrap_soft_limit_ms: u64,
    /// Hard limit on a bootstrap from enqueue to verdict, in milliseconds.
    #[serde(default = "default_bootstrap_hard")]
    pub bootstrap_hard_limit_ms: u64,
    /// Expected client heartbeat interval, in milliseconds.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_ms: u64,
    /// Slack on top of the heartbeat before a silent client is closed,
    /// in milliseconds.
    #[serde(default = "default_idle_grace")]
    pub idle_grace_ms: u64,
    /// Per-RPC deadline, in milliseconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,
    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
    /// TTL of a presence entry, in seconds.
    #[serde(default = "default_presence_ttl")]
    pub presence_ttl_seconds: u64,
    /// Pub/sub reconnect backoff start, in milliseconds.
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,
    /// Pub/sub reconnect backoff cap, in milliseconds.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
    /// Base URL of the document-updater service.
    #[serde(default = "default_document_updater_url")]
    pub document_updater_url: String,
}

impl RealtimeConfig {
    /// Batch write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Bootstrap soft limit.
    pub fn bootstrap_soft_limit(&self) -> Duration {
        Duration::from_millis(self.bootstrap_soft_limit_ms)
    }

    /// Bootstrap hard limit.
    pub fn bootstrap_hard_limit(&self) -> Duration {
        Duration::from_millis(self.bootstrap_hard_limit_ms)
    }

    /// Read idle timeout: one heartbeat interval plus the grace.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.saturating_add(self.idle_grace_ms))
    }

    /// RPC deadline.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Presence entry TTL.
    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_seconds)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_channel: default_base_channel(),
            product_domain: default_product_domain(),
            write_queue_capacity: default_write_queue_capacity(),
            writer_workers: default_writer_workers(),
            lazy_success_batch_max: default_lazy_batch(),
            write_timeout_ms: default_write_timeout(),
            bootstrap_workers: default_bootstrap_workers(),
            bootstrap_queue_size: default_bootstrap_queue(),
            bootstrap_soft_limit_ms: default_bootstrap_soft(),
            bootstrap_hard_limit_ms: default_bootstrap_hard(),
            heartbeat_interval_ms: default_heartbeat(),
            idle_grace_ms: default_idle_grace(),
            rpc_timeout_ms: default_rpc_timeout(),
            max_frame_bytes: default_max_frame(),
            presence_ttl_seconds: default_presence_ttl(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
            document_updater_url: default_document_updater_url(),
        }
    }
}

fn default_base_channel() -> String {
    "editor-events".to_string()
}

fn default_product_domain() -> String {
    "texhub.dev".to_string()
}

fn default_write_queue_capacity() -> usize {
    256
}

fn default_writer_workers() -> usize {
    16
}

fn default_lazy_batch() -> usize {
    32
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_bootstrap_workers() -> usize {
    60
}

fn default_bootstrap_queue() -> usize {
    20_000
}

fn default_bootstrap_soft() -> u64 {
    10_000
}

fn default_bootstrap_hard() -> u64 {
    30_000
}

fn default_heartbeat() -> u64 {
    30_000
}

fn default_idle_grace() -> u64 {
    15_000
}

fn default_rpc_timeout() -> u64 {
    10_000
}

fn default_max_frame() -> usize {
    7 * 1024 * 1024
}

fn default_presence_ttl() -> u64 {
    4 * 24 * 60 * 60
}

fn default_reconnect_initial() -> u64 {
    100
}

fn default_reconnect_max() -> u64 {
    10_000
}

fn default_document_updater_url() -> String {
    "http://localhost:3003".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_timeout_follows_heartbeat() {
        let mut config = RealtimeConfig::default();
        assert_eq!(config.idle_timeout(), Duration::from_secs(45));

        config.heartbeat_interval_ms = 5_000;
        config.idle_grace_ms = 250;
        assert_eq!(config.idle_timeout(), Duration::from_millis(5_250));
        assert!(config.idle_timeout() > Duration::from_millis(config.heartbeat_interval_ms));
    }
}
