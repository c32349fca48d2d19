// crates/server/src/routes/images.rs
//! Listing of images known to the container runtime.
//!
//! `podman images --format json` emits a JSON array; docker emits one JSON
//! object per line, and field names differ between the two. The parser
//! accepts both shapes and tolerates missing fields.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{TimeZone, Utc};
use ee_forge_jobs::process::run_capture;
use ee_forge_jobs::JobError;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize, PartialEq)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ImageInfo {
    pub name: String,
    pub id: String,
    pub created: String,
    pub size: String,
}

/// GET /api/images - Images reported by the configured container runtime.
pub async fn list_images(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ImageInfo>>, ApiError> {
    let runtime = state.manager.config().container_runtime.clone();
    let argv = vec![
        runtime.clone(),
        "images".into(),
        "--format".into(),
        "json".into(),
    ];
    let out = run_capture(&argv, None)
        .await
        .map_err(|_| JobError::Dependency(format!("{runtime} not installed or not in PATH")))?;
    if !out.success() {
        return Err(JobError::Dependency(format!(
            "{runtime} failed to list images: {}",
            out.stderr.trim()
        ))
        .into());
    }

    Ok(Json(parse_images(&out.stdout)))
}

fn parse_images(raw: &str) -> Vec<ImageInfo> {
    let mut entries: Vec<Value> = Vec::new();
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Array(items)) => entries = items,
        Ok(item @ Value::Object(_)) => entries.push(item),
        _ => {
            // Line-delimited JSON (docker).
            for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                if let Ok(item) = serde_json::from_str::<Value>(line) {
                    entries.push(item);
                }
            }
        }
    }

    let mut images = Vec::new();
    for entry in &entries {
        images.extend(images_from_entry(entry));
    }
    images
}

/// One runtime entry can carry several tags; untagged `<none>` entries are
/// dropped.
fn images_from_entry(entry: &Value) -> Vec<ImageInfo> {
    let names: Vec<String> = entry
        .get("Names")
        .or_else(|| entry.get("RepoTags"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|n| !n.contains("<none>"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if names.is_empty() {
        return vec![];
    }

    let id = entry
        .get("Id")
        .or_else(|| entry.get("ID"))
        .and_then(Value::as_str)
        .map(short_id)
        .unwrap_or_default();
    let created = entry
        .get("Created")
        .map(format_created)
        .or_else(|| {
            entry
                .get("CreatedAt")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();
    let size = entry.get("Size").map(format_size).unwrap_or_default();

    names
        .into_iter()
        .map(|name| ImageInfo {
            name,
            id: id.clone(),
            created: created.clone(),
            size: size.clone(),
        })
        .collect()
}

fn short_id(id: &str) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.chars().take(12).collect()
}

fn format_created(value: &Value) -> String {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn format_size(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_u64() {
            Some(bytes) if bytes >= 1_000_000_000 => {
                format!("{:.2} GB", bytes as f64 / 1e9)
            }
            Some(bytes) if bytes >= 1_000_000 => format!("{:.1} MB", bytes as f64 / 1e6),
            Some(bytes) if bytes >= 1_000 => format!("{:.1} kB", bytes as f64 / 1e3),
            Some(bytes) => format!("{bytes} B"),
            None => String::new(),
        },
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/images", get(list_images))
}
