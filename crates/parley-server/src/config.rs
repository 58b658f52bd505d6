//! Server configuration.

use std::time::Duration;

use parley_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the Parley hub.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat probe interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Lifetime drops after which a connection is evicted as a slow consumer.
    pub max_dropped_messages: u64,
    /// How long shutdown waits for sessions to close, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl ServerConfig {
    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Shutdown drain timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1000,
            heartbeat_interval_ms: 30_000,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            max_dropped_messages: 100,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            heartbeat_interval_ms: s.heartbeat_interval_ms,
            max_message_size: s.max_message_size,
            send_queue_capacity: s.send_queue_capacity,
            max_dropped_messages: s.max_dropped_messages,
            shutdown_timeout_ms: s.shutdown_timeout_ms,
        }
    }
}
