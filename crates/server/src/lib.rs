// crates/server/src/lib.rs
//! ee-forge server library.
//!
//! Axum-based HTTP layer over the job manager: REST endpoints for starting
//! and tracking container image builds, exports, and registry pushes.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ErrorResponse};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, environments, builds, exports, pushes, jobs, images)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(config: Config) -> Router {
    let state = Arc::new(AppState::new(config));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use ee_forge_jobs::ManagerConfig;
    use serde_json::{json, Value};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_app(dir: &Path) -> Router {
        let manager = ManagerConfig {
            environments_dir: dir.join("environments"),
            playbook_path: dir.join("playbook.sh"),
            playbook_runner: "bash".into(),
            container_runtime: "bash".into(),
            exports_dir: dir.join("exports"),
            max_concurrent_builds: 3,
            retention: Duration::from_secs(3600),
            cancel_grace: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        };
        create_app(Config::with_manager(manager))
    }

    fn make_env(dir: &Path, name: &str) {
        let env_dir = dir.join("environments").join(name);
        std::fs::create_dir_all(&env_dir).unwrap();
        std::fs::write(env_dir.join("execution-environment.yml"), "version: 3\n").unwrap();
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn wait_for_status(app: &Router, uri: &str, wanted: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = get(app, uri).await;
            assert_eq!(status, StatusCode::OK, "polling {uri}: {body}");
            let json: Value = serde_json::from_str(&body).unwrap();
            if json["status"] == wanted {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("{uri} never reached status {wanted}");
    }

    // ========================================================================
    // Health and listing endpoints
    // ========================================================================

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = TempDir::new().unwrap();
        let app = test_app(dir.path());
        let (status, body) = get(&app, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn test_environments_endpoint() {
        let dir = TempDir::new().unwrap();
        make_env(dir.path(), "minimal-ee");
        make_env(dir.path(), "aws-ee");
        // A directory without a definition file is not listed.
        std::fs::create_dir_all(dir.path().join("environments/scratch")).unwrap();
        let app = test_app(dir.path());

        let (status, body) = get(&app, "/api/environments").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["aws-ee", "minimal-ee"]);
    }

    #[tokio::test]
    async fn test_environments_missing_dir_is_empty_list() {
        let dir = TempDir::new().unwrap();
        let app = test_app(dir.path());
        let (status, body) = get(&app, "/api/environments").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn test_jobs_endpoint_starts_empty() {
        let dir = TempDir::new().unwrap();
        let app = test_app(dir.path());
        let (status, body) = get(&app, "/api/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
    }

    // ========================================================================
    // Build flow
    // ========================================================================

    #[tokio::test]
    async fn test_build_flow_end_to_end() {
        let dir = TempDir::new().unwrap();
        make_env(dir.path(), "minimal-ee");
        std::fs::write(
            dir.path().join("playbook.sh"),
            "echo 'Successfully built minimal-ee'\nexit 0\n",
        )
        .unwrap();
        let app = test_app(dir.path());

        let (status, body) = post_json(
            &app,
            "/api/builds",
            json!({"environments": ["minimal-ee"]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let started: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(started["status"], "running");
        let id = started["id"].as_str().unwrap().to_string();

        let job = wait_for_status(&app, &format!("/api/builds/{id}"), "completed").await;
        assert_eq!(job["exit_code"], 0);
        assert_eq!(job["successful_builds"], json!(["minimal-ee"]));
        assert_eq!(job["failed_builds"], json!([]));
        assert!(job["log"]
            .as_array()
            .unwrap()
            .iter()
            .any(|l| l.as_str().unwrap().contains("Successfully built minimal-ee")));

        // The summary listing knows about the job too.
        let (status, body) = get(&app, "/api/jobs").await;
        assert_eq!(status, StatusCode::OK);
        let jobs: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(jobs.as_array().unwrap().len(), 1);
        assert_eq!(jobs[0]["kind"], "build");
    }

    #[tokio::test]
    async fn test_build_validation_error_is_400() {
        let dir = TempDir::new().unwrap();
        make_env(dir.path(), "minimal-ee");
        let app = test_app(dir.path());

        let (status, body) = post_json(
            &app,
            "/api/builds",
            json!({"environments": ["does-not-exist"]}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["error"], "Invalid request");
        assert!(err["details"].as_str().unwrap().contains("does-not-exist"));
    }

    #[tokio::test]
    async fn test_build_status_unknown_id_is_404() {
        let dir = TempDir::new().unwrap();
        let app = test_app(dir.path());
        let (status, _) = get(
            &app,
            "/api/builds/00000000-0000-4000-8000-000000000000",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_build_cancel_flow() {
        let dir = TempDir::new().unwrap();
        make_env(dir.path(), "minimal-ee");
        std::fs::write(dir.path().join("playbook.sh"), "sleep 30\n").unwrap();
        let app = test_app(dir.path());

        let (status, body) = post_json(
            &app,
            "/api/builds",
            json!({"environments": ["minimal-ee"]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let id = serde_json::from_str::<Value>(&body).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (status, body) =
            post_json(&app, &format!("/api/builds/{id}/cancel"), json!({})).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let job = wait_for_status(&app, &format!("/api/builds/{id}"), "cancelled").await;
        assert_eq!(job["exit_code"], Value::Null);

        // Cancelling again conflicts.
        let (status, _) =
            post_json(&app, &format!("/api/builds/{id}/cancel"), json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_404() {
        let dir = TempDir::new().unwrap();
        make_env(dir.path(), "minimal-ee");
        std::fs::write(dir.path().join("playbook.sh"), "exit 0\n").unwrap();
        let app = test_app(dir.path());

        let (_, body) = post_json(
            &app,
            "/api/builds",
            json!({"environments": ["minimal-ee"]}),
        )
        .await;
        let id = serde_json::from_str::<Value>(&body).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        // A build job is not visible through the export endpoints.
        let (status, _) = get(&app, &format!("/api/exports/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&app, &format!("/api/pushes/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ========================================================================
    // Export flow
    // ========================================================================

    fn write_stub_runtime(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("runtime");
        std::fs::write(
            &path,
            concat!(
                "#!/bin/sh\n",
                "case \"$1\" in\n",
                "  --version) echo 'stub 1.0'; exit 0 ;;\n",
                "  inspect) exit 0 ;;\n",
                "  save) printf 'tar-bytes' > \"$3\"; exit 0 ;;\n",
                "  *) exit 1 ;;\n",
                "esac\n"
            ),
        )
        .unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_export_flow_with_download() {
        let dir = TempDir::new().unwrap();
        let manager = ManagerConfig {
            environments_dir: dir.path().join("environments"),
            playbook_path: dir.path().join("playbook.sh"),
            playbook_runner: "bash".into(),
            container_runtime: write_stub_runtime(dir.path()),
            exports_dir: dir.path().join("exports"),
            max_concurrent_builds: 3,
            retention: Duration::from_secs(3600),
            cancel_grace: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        };
        let app = create_app(Config::with_manager(manager));

        let (status, body) = post_json(
            &app,
            "/api/exports",
            json!({"image_name": "my-ee:latest"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let id = serde_json::from_str::<Value>(&body).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let job = wait_for_status(&app, &format!("/api/exports/{id}"), "completed").await;
        assert!(job["file_size"].as_u64().unwrap() > 0);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/exports/{id}/download"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-tar"
        );
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("my-ee_latest_"));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"tar-bytes");
    }

    #[tokio::test]
    async fn test_export_download_requires_completion() {
        let dir = TempDir::new().unwrap();
        let app = test_app(dir.path());
        // Unknown job first.
        let (status, _) = get(
            &app,
            "/api/exports/00000000-0000-4000-8000-000000000000/download",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
