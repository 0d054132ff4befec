use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::DubError;
use crate::job::TtsEngine;
use crate::languages::{self, Language};
use crate::outputs;
use super::error::{AppError, AppResult};
use super::registry::JobSnapshot;
use super::state::AppState;
use super::upload;

const INDEX_HTML: &str = include_str!("index.html");

/// GET / -- the dubbing form
pub async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct SystemResponse {
    pub lines: Vec<String>,
    #[serde(flatten)]
    pub info: crate::system_info::SystemInfo,
}

/// GET /api/system -- accelerator and engine summary
pub async fn system(State(state): State<AppState>) -> Json<SystemResponse> {
    Json(SystemResponse {
        lines: state.system_info.lines(),
        info: state.system_info.as_ref().clone(),
    })
}

#[derive(Serialize)]
pub struct TtsChoice {
    pub value: &'static str,
    pub label: &'static str,
}

#[derive(Serialize)]
pub struct FormOptions {
    pub targets: &'static [Language],
    pub sources: Vec<Language>,
    pub default_target: &'static str,
    pub tts_engines: Vec<TtsChoice>,
    pub supported_formats: Vec<String>,
    pub max_file_size_mb: u64,
    pub gpu_available: bool,
}

/// GET /api/languages -- choices rendered by the form
pub async fn form_options(State(state): State<AppState>) -> Json<FormOptions> {
    let validator = state.runner.validator();
    Json(FormOptions {
        targets: languages::LANGUAGES,
        sources: languages::source_languages(),
        default_target: languages::DEFAULT_TARGET,
        tts_engines: TtsEngine::ALL
            .iter()
            .map(|e| TtsChoice {
                value: e.as_str(),
                label: e.label(),
            })
            .collect(),
        supported_formats: validator.supported_formats().to_vec(),
        max_file_size_mb: validator.max_file_size() / 1024 / 1024,
        gpu_available: state.runner.accelerator().is_available(),
    })
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status_url: String,
}

/// POST /api/jobs -- upload a video and start dubbing it.
///
/// Validation runs before responding so the form gets the message at once;
/// the engine itself runs in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let max_file_size = state.runner.validator().max_file_size();
    let upload::SubmitForm { request, staging } =
        upload::receive(&state.upload_dir, max_file_size, multipart).await?;

    state
        .runner
        .validator()
        .validate(&request)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let job_id = Uuid::new_v4();
    state.jobs.insert(job_id);
    info!("Accepted job {}: {:?}", job_id, request);

    let runner = state.runner.clone();
    let jobs = state.jobs.clone();
    tokio::spawn(async move {
        let result = runner.submit_with_id(job_id, &request, jobs.as_ref()).await;
        jobs.complete(&result);
        // Staged upload is removed only once the engine is done with it
        drop(staging);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status_url: format!("/api/jobs/{}", job_id),
        }),
    ))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobSnapshot>> {
    state
        .jobs
        .get(job_id)
        .map(Json)
        .ok_or_else(|| DubError::JobNotFound(job_id).into())
}

#[derive(Serialize)]
pub struct OutputEntry {
    pub name: String,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub modified: DateTime<Utc>,
    pub download_url: String,
}

/// GET /api/outputs -- dubbed files currently on disk
pub async fn list_outputs(State(state): State<AppState>) -> AppResult<Json<Vec<OutputEntry>>> {
    let dir = state.runner.output_dir().to_path_buf();
    let artifacts = tokio::task::spawn_blocking(move || outputs::list(dir))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(Json(
        artifacts
            .into_iter()
            .map(|a| OutputEntry {
                download_url: format!("/outputs/{}", a.name),
                size_mb: a.size_mb(),
                name: a.name,
                size_bytes: a.size_bytes,
                modified: a.modified,
            })
            .collect(),
    ))
}
