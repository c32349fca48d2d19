// crates/server/src/routes/builds.rs
//! Build job endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use ee_forge_jobs::{BuildRequest, Job, JobId, JobKind, JobRequest, JobStatus};
use serde::Serialize;

use crate::error::ApiError;
use crate::routes::expect_kind;
use crate::state::AppState;

/// Acknowledgement returned when a job is accepted.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct JobStarted {
    pub id: JobId,
    pub status: JobStatus,
}

/// POST /api/builds - Validate and start a build job.
pub async fn start_build(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BuildRequest>,
) -> Result<Json<JobStarted>, ApiError> {
    let id = state.manager.submit(JobRequest::Build(request)).await?;
    Ok(Json(JobStarted {
        id,
        status: JobStatus::Running,
    }))
}

/// GET /api/builds/{id} - Full build job state, including the log.
pub async fn build_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    let job = state.manager.status(id).await?;
    expect_kind(&job, JobKind::Build)?;
    Ok(Json(job))
}

/// POST /api/builds/{id}/cancel - Cancel a running build.
pub async fn cancel_build(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Json<JobStarted>, ApiError> {
    let job = state.manager.status(id).await?;
    expect_kind(&job, JobKind::Build)?;
    state.manager.cancel(id).await?;
    Ok(Json(JobStarted {
        id,
        status: JobStatus::Cancelled,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/builds", post(start_build))
        .route("/builds/{id}", get(build_status))
        .route("/builds/{id}/cancel", post(cancel_build))
}
