// crates/server/src/routes/jobs.rs
//! Cross-kind job listing.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use ee_forge_jobs::JobSummary;

use crate::state::AppState;

/// GET /api/jobs - Summaries of all jobs, newest first.
///
/// Spans both active and retained finished jobs; evicted jobs are gone.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSummary>> {
    Json(state.manager.list())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs", get(list_jobs))
}
