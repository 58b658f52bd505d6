//! `ParleyServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum_extra::extract::CookieJar;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parley_core::close;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{CredentialQuery, extract_credential};
use crate::collaborators::{Collaborators, SessionResolver};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics as names;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::{Hub, HubLimits};
use crate::websocket::heartbeat::run_heartbeat;
use crate::websocket::session::{close_socket, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry and broadcast router.
    pub hub: Arc<Hub>,
    /// Upgrade credential lookup.
    pub sessions: Arc<dyn SessionResolver>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Parley chat hub server.
pub struct ParleyServer {
    config: Arc<ServerConfig>,
    hub: Arc<Hub>,
    sessions: Arc<dyn SessionResolver>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl ParleyServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        let limits = HubLimits {
            max_connections: config.max_connections,
            send_queue_capacity: config.send_queue_capacity,
            max_dropped_messages: config.max_dropped_messages,
        };
        Self {
            hub: Arc::new(Hub::new(
                collaborators.authorizer,
                collaborators.store,
                limits,
            )),
            sessions: collaborators.sessions,
            config: Arc::new(config),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            sessions: self.sessions.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, start serving and start the heartbeat.
    ///
    /// Returns the bound address and a handle that completes after shutdown.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "parley hub listening");

        let token = self.shutdown.token();
        let heartbeat = tokio::spawn(run_heartbeat(
            self.hub.clone(),
            self.config.heartbeat_interval(),
            token.clone(),
        ));

        let router = self.router();
        let hub = self.hub.clone();
        let handle = tokio::spawn(async move {
            let close_token = token.clone();
            let closer = tokio::spawn(async move {
                close_token.cancelled().await;
                let closed = hub.close_all(close::GOING_AWAY, "server shutting down");
                info!(closed, "closing connections for shutdown");
            });

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server stopped with error");
            }
            let _ = heartbeat.await;
            let _ = closer.await;
        });

        Ok((local_addr, handle))
    }

    /// Stop accepting, close every session with 1001 and wait for the
    /// registry to empty, up to the configured timeout.
    pub async fn shutdown_gracefully(&self) -> bool {
        self.shutdown.shutdown();
        let drain = async {
            while self.hub.connection_count() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(25)).await;
            }
        };
        let drained = tokio::time::timeout(self.config.shutdown_timeout(), drain)
            .await
            .is_ok();
        if !drained {
            warn!(
                remaining = self.hub.connection_count(),
                "shutdown timed out with connections still registered"
            );
        }
        drained
    }

    /// Get the hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
///
/// Requests without a resolvable credential are upgraded and immediately
/// closed with 1008 so the client can tell "sign in again" apart from a
/// network failure. They never reach the hub.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<CredentialQuery>,
) -> Response {
    let user_id = match extract_credential(&headers, &jar, &query) {
        Some(credential) => state.sessions.resolve(&credential).await,
        None => None,
    };
    let shutting_down = state.shutdown.is_shutting_down();
    let hub = state.hub.clone();

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            if shutting_down {
                close_socket(socket, close::GOING_AWAY, "server shutting down").await;
                return;
            }
            match user_id {
                Some(user_id) => run_ws_session(socket, hub, user_id).await,
                None => {
                    info!("rejecting unauthenticated websocket");
                    counter!(names::WS_AUTH_REJECTIONS_TOTAL, "reason" => "unauthorized")
                        .increment(1);
                    close_socket(socket, close::POLICY_VIOLATION, "Unauthorized").await;
                }
            }
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
        state.hub.channel_count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
