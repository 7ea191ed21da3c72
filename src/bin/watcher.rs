use std::future::IntoFuture as _;

use kuberlogic_session::{
    config::{SessionConfig, WatcherConfig},
    telemetry,
    watcher::{State, WatcherController},
};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;

    // Grab needed env
    let session = SessionConfig::from_env()?;
    let watcher = WatcherConfig::from_env()?;

    // Initialize Kubernetes controller state
    let state = State::default();
    let controller = WatcherController::new(state.clone());

    // Start web server
    let listener = TcpListener::bind(watcher.listen_addr).await?;
    info!("serving health and metrics on {}", watcher.listen_addr);
    let router = handlers::router();
    let server = axum::serve(listener, router.with_state(state));

    // Run both the http server and the controller, failing if either finishes early
    tokio::select! {
        c = controller.run(session, watcher) => {
            anyhow::bail!("controller exited early: {:?}", c.err())
        },
        s = server.into_future() => {
            anyhow::bail!("server exited early: {:?}", s.err())
        }
    }
}

/// Handlers for the web server portion of the watcher
mod handlers {
    use axum::{extract::State, http::StatusCode, response::IntoResponse, routing, Json, Router};
    use prometheus::{Encoder, TextEncoder};

    use kuberlogic_session::watcher::State as WatcherState;

    /// Construct the router for all the handlers
    pub fn router() -> Router<WatcherState> {
        Router::new()
            .route("/metrics", routing::get(metrics))
            .route("/health", routing::get(health))
            .route("/", routing::get(index))
    }

    /// Handler for exposing prometheus metrics
    async fn metrics(State(state): State<WatcherState>) -> impl IntoResponse {
        let metrics = state.metrics();
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        match encoder.encode(&metrics, &mut buffer) {
            Ok(()) => (StatusCode::OK, buffer),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string().into_bytes()),
        }
    }

    /// Handler for checking the health of the server
    async fn health() -> impl IntoResponse {
        (StatusCode::OK, Json("healthy"))
    }

    /// Handler for the latest probe of every service
    async fn index(State(state): State<WatcherState>) -> impl IntoResponse {
        let diagnostics = state.diagnostics().await;

        (StatusCode::OK, Json(diagnostics))
    }
}
