//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "client": { "url": "ws://chat.local/ws" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Hub settings.
    pub server: ServerSettings,
    /// Client session and reconnection settings.
    pub client: ClientSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Hub network and runtime settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Registration cap. New upgrades beyond it are closed with 1013.
    pub max_connections: usize,
    /// Heartbeat probe interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Lifetime drops after which a connection is evicted.
    pub max_dropped_messages: u64,
    /// Grace period for draining connections on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            max_connections: 1000,
            heartbeat_interval_ms: 30_000,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            max_dropped_messages: 100,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Client connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Hub WebSocket URL.
    pub url: String,
    /// Application ping interval in milliseconds.
    pub keepalive_interval_ms: u64,
    /// First reconnect delay in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay ceiling in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Timeout for a single connect attempt in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787/ws".to_string(),
            keepalive_interval_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.port, 8787);
        assert_eq!(s.heartbeat_interval_ms, 30_000);
        assert_eq!(s.max_message_size, 65_536);
        assert_eq!(s.send_queue_capacity, 256);
    }

    #[test]
    fn client_defaults_match_backoff_policy() {
        let c = ClientSettings::default();
        assert_eq!(c.reconnect_base_delay_ms, 1_000);
        assert_eq!(c.reconnect_max_delay_ms, 30_000);
        assert_eq!(c.keepalive_interval_ms, 30_000);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ParleySettings::default()).unwrap();
        assert_eq!(json["server"]["maxConnections"], 1000);
        assert_eq!(json["client"]["reconnectBaseDelayMs"], 1000);
        assert_eq!(json["logging"]["level"], "info");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: ParleySettings =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.client, ClientSettings::default());
    }
}
