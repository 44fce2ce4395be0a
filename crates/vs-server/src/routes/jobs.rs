//! Job management route handlers.

use std::path::PathBuf;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use vs_core::{Container, Error, Job, JobFilter, JobId, JobOptions, JobState};

use crate::context::AppContext;
use crate::error::AppError;

/// Query parameters for listing jobs.
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub state: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Request body for submitting a new job.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub source: PathBuf,
    /// Target format name; `mp4` when omitted.
    pub target: Option<String>,
    #[serde(default)]
    pub options: JobOptions,
}

fn parse_id(id: &str) -> Result<JobId, AppError> {
    id.parse()
        .map_err(|_| Error::Validation(format!("invalid job id: {id}")).into())
}

/// GET /api/jobs
pub async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<Vec<Job>>, AppError> {
    let state = params.state.as_deref().map(str::parse::<JobState>).transpose()?;
    let filter = JobFilter {
        state,
        offset: params.offset,
        limit: Some(params.limit),
    };
    Ok(Json(ctx.scheduler.list(&filter)?))
}

/// POST /api/jobs
pub async fn submit_job(
    State(ctx): State<AppContext>,
    Json(payload): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, AppError> {
    let target = match payload.target.as_deref() {
        Some(name) => name.parse::<Container>()?,
        None => Container::default(),
    };
    let job = ctx.scheduler.submit(payload.source, target, payload.options)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/jobs/{id}
pub async fn get_job(State(ctx): State<AppContext>, Path(id): Path<String>) -> Result<Json<Job>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(ctx.scheduler.get(id)?))
}

/// POST /api/jobs/{id}/cancel
pub async fn cancel_job(State(ctx): State<AppContext>, Path(id): Path<String>) -> Result<Json<Job>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(ctx.scheduler.cancel(id)?))
}
