// crates/server/src/routes/pushes.rs
//! Registry push endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use ee_forge_jobs::{Job, JobId, JobKind, JobRequest, JobStatus, PushRequest};

use crate::error::ApiError;
use crate::routes::{builds::JobStarted, expect_kind};
use crate::state::AppState;

/// POST /api/pushes - Tag and log in synchronously, then start the push.
///
/// Tagging or login failures are reported here as 400s; only the push
/// itself runs as a tracked job.
pub async fn start_push(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PushRequest>,
) -> Result<Json<JobStarted>, ApiError> {
    let id = state.manager.submit(JobRequest::Push(request)).await?;
    Ok(Json(JobStarted {
        id,
        status: JobStatus::Running,
    }))
}

/// GET /api/pushes/{id} - Full push job state, including the log.
pub async fn push_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    let job = state.manager.status(id).await?;
    expect_kind(&job, JobKind::Push)?;
    Ok(Json(job))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pushes", post(start_push))
        .route("/pushes/{id}", get(push_status))
}
