//! API route handlers for the ee-forge server.

pub mod builds;
pub mod environments;
pub mod exports;
pub mod health;
pub mod images;
pub mod jobs;
pub mod pushes;

use std::sync::Arc;

use axum::Router;
use ee_forge_jobs::{Job, JobError, JobKind};

use crate::error::ApiError;
use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check
/// - GET  /api/environments - List buildable environment definitions
/// - POST /api/builds - Start a build job
/// - GET  /api/builds/{id} - Build job status and log
/// - POST /api/builds/{id}/cancel - Cancel a running build
/// - POST /api/exports - Start an image export job
/// - GET  /api/exports/{id} - Export job status and log
/// - GET  /api/exports/{id}/download - Download a completed export tar
/// - POST /api/pushes - Tag, log in, and start a registry push job
/// - GET  /api/pushes/{id} - Push job status and log
/// - GET  /api/jobs - Summaries of all jobs, active and retained
/// - GET  /api/images - Images known to the container runtime
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", environments::router())
        .nest("/api", builds::router())
        .nest("/api", exports::router())
        .nest("/api", pushes::router())
        .nest("/api", jobs::router())
        .nest("/api", images::router())
        .with_state(state)
}

/// A job looked up through a kind-specific endpoint must be of that kind;
/// anything else is reported as not found.
pub(crate) fn expect_kind(job: &Job, kind: JobKind) -> Result<(), ApiError> {
    if job.kind == kind {
        Ok(())
    } else {
        Err(JobError::NotFound(job.id).into())
    }
}
