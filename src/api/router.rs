//! API router configuration and server entry points.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header::CONTENT_TYPE, HeaderName},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use super::handlers::{delete_session, health, post_message, AppState};
use super::stream::open_stream;
use crate::app::DemoFactory;
use crate::lifecycle::{SessionManager, DEFAULT_NOTIFICATION_BUFFER};
use crate::routing::SESSION_ID_HEADER;

/// Default path of the session endpoint.
pub const DEFAULT_ENDPOINT: &str = "/mcp";

/// Create the API router with all routes configured.
pub fn create_router() -> Router {
    create_router_with_state(AppState::new())
}

/// Create the API router with custom state at the default endpoint.
pub fn create_router_with_state(state: AppState) -> Router {
    create_router_at(DEFAULT_ENDPOINT, state)
}

/// Create the API router with the session endpoint mounted at `endpoint`.
pub fn create_router_at(endpoint: &str, state: AppState) -> Router {
    let session_header = HeaderName::from_static(SESSION_ID_HEADER);

    Router::new()
        .route("/health", get(health))
        .route(
            endpoint,
            post(post_message).get(open_stream).delete(delete_session),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers([CONTENT_TYPE, session_header.clone()])
                .expose_headers([session_header]),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Path of the session endpoint.
    pub endpoint: String,
    /// Close sessions and drain connections on Ctrl-C.
    pub graceful_shutdown: bool,
    /// Terminate sessions idle for longer than this.
    pub idle_timeout: Option<Duration>,
    /// How often to look for idle sessions.
    pub reap_interval: Duration,
    /// Per-session notification buffer.
    pub notification_buffer: usize,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn without_graceful_shutdown(mut self) -> Self {
        self.graceful_shutdown = false;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5004,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            graceful_shutdown: true,
            idle_timeout: None,
            reap_interval: Duration::from_secs(30),
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
        }
    }
}

/// Start the API server serving the demo application.
pub async fn serve(config: ServerConfig) -> crate::Result<()> {
    let state = AppState::with_manager(SessionManager::start_with_buffer(
        Arc::new(DemoFactory::new()),
        config.notification_buffer,
    ));
    serve_with_state(config, state).await
}

/// Start the API server with custom state.
pub async fn serve_with_state(config: ServerConfig, state: AppState) -> crate::Result<()> {
    let addr = config.bind_address();
    let router = create_router_at(&config.endpoint, state.clone());

    let reaper = config
        .idle_timeout
        .map(|timeout| state.manager.spawn_reaper(timeout, config.reap_interval));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("session-mux listening on http://{}{}", addr, config.endpoint);

    if config.graceful_shutdown {
        let manager = state.manager.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                // Ending sessions also ends their notification streams, which
                // would otherwise keep connections open forever.
                let closed = manager.shutdown().await;
                info!(closed, "Sessions closed for shutdown");
            })
            .await?;
    } else {
        axum::serve(listener, router).await?;
    }

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    state.manager.shutdown().await;

    info!("session-mux stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C; graceful shutdown disabled");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
