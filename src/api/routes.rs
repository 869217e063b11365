//! HTTP routing, shared state and server lifecycle.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::{AgentRunner, ChatAgent, ProcessToolLauncher};
use crate::config::Config;
use crate::llm::OpenAiClient;
use crate::recordings::{ArtifactStore, RecordingMonitor};
use crate::session_store;

use super::agent;
use super::types::HealthResponse;
use super::videos;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Runs tasks against per-request tool processes
    pub runner: Arc<AgentRunner>,
    /// Read-only view over session recordings
    pub monitor: RecordingMonitor,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/agent/:session_id", post(agent::run_agent))
        .route("/api/videos/:session_id", get(videos::list_videos))
        .route(
            "/videos/:session_id/:timestamp/:filename",
            get(videos::serve_video),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.videos_dir).await?;

    let store = session_store::open_store(config.session_db_path.clone())
        .await
        .map_err(anyhow::Error::msg)?;
    let llm = Arc::new(
        OpenAiClient::new(config.api_key.clone(), config.api_base_url.clone())
            .with_request_timeout(config.llm_request_timeout),
    );
    let model = Arc::new(ChatAgent::new(
        llm,
        config.model.clone(),
        config.max_iterations,
    ));
    let artifacts = ArtifactStore::new(config.videos_dir.clone());
    let launcher = Arc::new(ProcessToolLauncher::new(config.tools.clone()));
    let runner = Arc::new(AgentRunner::new(
        model,
        store,
        launcher,
        artifacts.clone(),
        config.history_limit,
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        runner,
        monitor: RecordingMonitor::new(artifacts),
    });
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests");
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    tracing::trace!(model = %state.config.model, "Health check");
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
