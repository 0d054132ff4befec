// Browser surface for the job runner
//
// - Routes: form, job submission and status, outputs, system info
// - Upload: multipart parsing and upload staging
// - Registry: in-memory job snapshots fed by progress updates
// - Error: JSON error responses

pub mod error;
pub mod registry;
pub mod routes;
pub mod state;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{DubError, Result};
pub use state::AppState;

/// Room for the multipart framing and text fields on top of the video itself
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .runner
        .validator()
        .max_file_size()
        .saturating_add(FORM_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);
    let outputs = ServeDir::new(state.runner.output_dir());

    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health))
        .route("/api/system", get(routes::system))
        .route("/api/languages", get(routes::form_options))
        .route(
            "/api/jobs",
            post(routes::submit_job).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/jobs/{id}", get(routes::get_job))
        .route("/api/outputs", get(routes::list_outputs))
        .nest_service("/outputs", outputs)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the form until the process is stopped
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| DubError::Config(format!("Invalid listen address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Dubbing form listening on http://{}", addr);

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
