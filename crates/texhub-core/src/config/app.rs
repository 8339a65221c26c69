//! Connection server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Low-level connection server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address: `host:port` for TCP or `unix:/path/to.sock`.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Request path that is upgraded to a WebSocket.
    #[serde(default = "default_websocket_path")]
    pub websocket_path: String,
    /// Request path answered by the status check.
    #[serde(default = "default_status_path")]
    pub status_path: String,
    /// Size of one pooled read buffer in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Maximum number of buffer fills for the request line plus headers.
    #[serde(default = "default_max_buffer_fills")]
    pub max_buffer_fills: usize,
    /// Number of idle buffers kept in the pool.
    #[serde(default = "default_buffer_pool_size")]
    pub buffer_pool_size: usize,
    /// Deadline for reading the whole request head, in milliseconds.
    #[serde(default = "default_request_read_timeout")]
    pub request_read_timeout_ms: u64,
    /// Deadline for writing a plain HTTP response, in milliseconds.
    #[serde(default = "default_response_write_timeout")]
    pub response_write_timeout_ms: u64,
    /// How long `/status` answers 503 before the listener stops accepting.
    #[serde(default)]
    pub readiness_grace_ms: u64,
    /// Maximum time to wait for in-flight connections during shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl ServerConfig {
    /// Request head read deadline.
    pub fn request_read_timeout(&self) -> Duration {
        Duration::from_millis(self.request_read_timeout_ms)
    }

    /// Plain response write deadline.
    pub fn response_write_timeout(&self) -> Duration {
        Duration::from_millis(self.response_write_timeout_ms)
    }

    /// Readiness grace period.
    pub fn readiness_grace(&self) -> Duration {
        Duration::from_millis(self.readiness_grace_ms)
    }

    /// Shutdown drain deadline.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            websocket_path: default_websocket_path(),
            status_path: default_status_path(),
            buffer_size: default_buffer_size(),
            max_buffer_fills: default_max_buffer_fills(),
            buffer_pool_size: default_buffer_pool_size(),
            request_read_timeout_ms: default_request_read_timeout(),
            response_write_timeout_ms: default_response_write_timeout(),
            readiness_grace_ms: 0,
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:3026".to_string()
}

fn default_websocket_path() -> String {
    "/socket".to_string()
}

fn default_status_path() -> String {
    "/status".to_string()
}

fn default_buffer_size() -> usize {
    4096
}

fn default_max_buffer_fills() -> usize {
    2
}

fn default_buffer_pool_size() -> usize {
    1024
}

fn default_request_read_timeout() -> u64 {
    10_000
}

fn default_response_write_timeout() -> u64 {
    5_000
}

fn default_shutdown_grace() -> u64 {
    30
}
