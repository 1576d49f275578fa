//! `RunletServer`: axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::connection;
use crate::executor::Executor;
use crate::runner::Runner;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Executes submissions.
    pub executor: Arc<Executor>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Currently connected clients.
    pub active: Arc<AtomicUsize>,
    /// Prometheus render handle, when metrics are installed.
    pub metrics: Option<PrometheusHandle>,
}

/// JSON body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server answers.
    pub status: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Currently connected clients.
    pub connections: usize,
}

/// The runlet server.
pub struct RunletServer {
    config: Arc<ServerConfig>,
    executor: Arc<Executor>,
    active: Arc<AtomicUsize>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RunletServer {
    /// A server over `runner` with the given configuration.
    pub fn new(
        config: ServerConfig,
        runner: Arc<dyn Runner>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let executor = Arc::new(Executor::new(runner, Duration::from_secs(config.timeout_secs)));
        Self {
            config: Arc::new(config),
            executor,
            active: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            executor: Arc::clone(&self.executor),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            active: Arc::clone(&self.active),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve. Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!(error = %err, "server stopped");
            }
        });
        tracing::info!(%addr, "listening");
        Ok((addr, handle))
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::run_connection(socket, state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        connections: state.active.load(Ordering::Relaxed),
    })
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::runner::CommandRunner;

    fn make_server() -> RunletServer {
        let config = ServerConfig::default();
        let runner = Arc::new(CommandRunner::new(
            config.runner.clone(),
            config.source_file.clone(),
        ));
        RunletServer::new(config, runner, None)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_empty_without_recorder() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_rejects_plain_get() {
        // Without an Upgrade header the WebSocket route cannot upgrade.
        let app = make_server().router();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_auto_assigned_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        handle.abort();
    }

    #[test]
    fn custom_config_is_kept() {
        let config = ServerConfig {
            host: "0.0.0.0".into(),
            port: 9090,
            timeout_secs: 5,
            ..ServerConfig::default()
        };
        let runner = Arc::new(CommandRunner::new(
            config.runner.clone(),
            config.source_file.clone(),
        ));
        let server = RunletServer::new(config, runner, None);
        assert_eq!(server.config().host, "0.0.0.0");
        assert_eq!(server.config().port, 9090);
        assert_eq!(server.config().timeout_secs, 5);
    }
}
