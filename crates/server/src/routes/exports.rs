// crates/server/src/routes/exports.rs
//! Export job endpoints, including the tar download.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ee_forge_jobs::{
    ExportRequest, Job, JobDetails, JobError, JobId, JobKind, JobRequest, JobStatus,
};
use tokio_util::io::ReaderStream;

use crate::error::ApiError;
use crate::routes::{builds::JobStarted, expect_kind};
use crate::state::AppState;

/// POST /api/exports - Start an image export job.
pub async fn start_export(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<JobStarted>, ApiError> {
    let id = state.manager.submit(JobRequest::Export(request)).await?;
    Ok(Json(JobStarted {
        id,
        status: JobStatus::Running,
    }))
}

/// GET /api/exports/{id} - Full export job state, including the log.
pub async fn export_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    let job = state.manager.status(id).await?;
    expect_kind(&job, JobKind::Export)?;
    Ok(Json(job))
}

/// GET /api/exports/{id}/download - Stream the exported tar.
///
/// Only completed exports are downloadable; anything else is a 400 naming
/// the job's current status.
pub async fn download_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Response, ApiError> {
    let job = state.manager.status(id).await?;
    expect_kind(&job, JobKind::Export)?;

    if job.status != JobStatus::Completed {
        return Err(JobError::Validation(format!(
            "export {id} is not completed (status: {})",
            job.status.as_str()
        ))
        .into());
    }

    let JobDetails::Export { file_path, .. } = &job.details else {
        return Err(ApiError::Internal("export job without export details".into()));
    };

    let file = tokio::fs::File::open(file_path)
        .await
        .map_err(|e| ApiError::Internal(format!("export file unavailable: {e}")))?;
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("export.tar")
        .to_string();

    let headers = [
        (header::CONTENT_TYPE, "application/x-tar".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/exports", post(start_export))
        .route("/exports/{id}", get(export_status))
        .route("/exports/{id}/download", get(download_export))
}
