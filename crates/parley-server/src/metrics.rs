//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup, before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections registered total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Broadcast deliveries dropped on a full or closed queue (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Connections evicted for exceeding the drop limit (counter).
pub const WS_SLOW_CONSUMER_EVICTIONS_TOTAL: &str = "ws_slow_consumer_evictions_total";
/// Connections reaped by the heartbeat (counter).
pub const WS_HEARTBEAT_REAPED_TOTAL: &str = "ws_heartbeat_reaped_total";
/// Upgrades refused (counter, labels: reason).
pub const WS_AUTH_REJECTIONS_TOTAL: &str = "ws_auth_rejections_total";
/// Inbound frames that failed to decode (counter, labels: kind).
pub const WS_PROTOCOL_ERRORS_TOTAL: &str = "ws_protocol_errors_total";
/// Chat messages durably stored (counter).
pub const CHAT_MESSAGES_PERSISTED_TOTAL: &str = "chat_messages_persisted_total";
/// Chat messages refused (counter, labels: reason).
pub const CHAT_MESSAGE_ERRORS_TOTAL: &str = "chat_message_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_BROADCAST_DROPS_TOTAL,
            WS_SLOW_CONSUMER_EVICTIONS_TOTAL,
            WS_HEARTBEAT_REAPED_TOTAL,
            WS_AUTH_REJECTIONS_TOTAL,
            WS_PROTOCOL_ERRORS_TOTAL,
            CHAT_MESSAGES_PERSISTED_TOTAL,
            CHAT_MESSAGE_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
