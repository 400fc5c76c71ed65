//! `GatewayServer`: axum HTTP + WebSocket listener.
//!
//! Routes:
//! - `GET /ws`: WebSocket upgrade, one [`Session`] per connection
//! - `GET /health`: JSON status
//! - `GET /metrics`: Prometheus text, when a recorder handle is attached

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use huddle_store::Store;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::health::{self, HealthResponse};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::session::Session;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::ws;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn Store>,
    config: Arc<ServerConfig>,
    metrics: Option<PrometheusHandle>,
    shutdown: ShutdownCoordinator,
    sessions: TaskTracker,
    connections: Arc<AtomicUsize>,
    start_time: Instant,
}

/// The gateway server.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    /// Create a server over `store` dispatching through `dispatcher`.
    pub fn new(config: ServerConfig, store: Arc<dyn Store>, dispatcher: Dispatcher) -> Self {
        Self {
            state: AppState {
                dispatcher: Arc::new(dispatcher),
                store,
                config: Arc::new(config),
                metrics: None,
                shutdown: ShutdownCoordinator::new(),
                sessions: TaskTracker::new(),
                connections: Arc::new(AtomicUsize::new(0)),
                start_time: Instant::now(),
            },
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// The message dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.state.dispatcher
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.state.shutdown
    }

    /// Number of open WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Relaxed)
    }

    /// Bind the configured address and serve in the background.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, "huddle gateway listening");

        Ok(ServerHandle {
            addr,
            serve,
            sessions: self.state.sessions.clone(),
            shutdown: self.state.shutdown.clone(),
        })
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    serve: JoinHandle<()>,
    sessions: TaskTracker,
    shutdown: ShutdownCoordinator,
}

impl ServerHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting, close every session, and wait up to `timeout`.
    ///
    /// Returns `false` if something was still running when the timeout hit.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let sessions = self.sessions;
        let _ = sessions.close();
        let drained = tokio::spawn(async move { sessions.wait().await });
        self.shutdown
            .graceful_shutdown(vec![self.serve, drained], timeout)
            .await
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let tracker = state.sessions.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| tracker.track_future(handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _ = state.connections.fetch_add(1, Ordering::Relaxed);
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let result = Session::run(
        ws::transport(socket),
        Arc::clone(&state.dispatcher),
        Arc::clone(&state.store),
        Arc::clone(&state.config),
        state.shutdown.token(),
    )
    .await;
    if let Err(e) = result {
        warn!(error = %e, "connection rejected");
    }

    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    let _ = state.connections.fetch_sub(1, Ordering::Relaxed);
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connections.load(Ordering::Relaxed),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
