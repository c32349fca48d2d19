// crates/server/src/routes/environments.rs
//! Listing of buildable environment definitions.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// One buildable environment: a subdirectory of the environments dir that
/// carries an `execution-environment.yml`.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct EnvironmentInfo {
    pub name: String,
    pub path: String,
}

/// GET /api/environments - List environment definitions, sorted by name.
///
/// A missing environments directory yields an empty list rather than an
/// error; builds against it still fail validation with a clear message.
pub async fn list_environments(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EnvironmentInfo>>, ApiError> {
    let dir = &state.manager.config().environments_dir;
    if !dir.is_dir() {
        tracing::warn!(path = %dir.display(), "environments directory not found");
        return Ok(Json(vec![]));
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| ApiError::Internal(format!("failed to read environments dir: {e}")))?;

    let mut environments = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() || !path.join("execution-environment.yml").is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            environments.push(EnvironmentInfo {
                name: name.to_string(),
                path: path.display().to_string(),
            });
        }
    }
    environments.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(environments))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/environments", get(list_environments))
}
