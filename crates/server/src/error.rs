// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ee_forge_jobs::JobError;
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Job(job_err) => match job_err {
                JobError::Validation(msg) => {
                    tracing::warn!(error = %msg, "Invalid request");
                    (
                        StatusCode::BAD_REQUEST,
                        ErrorResponse::with_details("Invalid request", msg.clone()),
                    )
                }
                JobError::NotFound(id) => {
                    tracing::warn!(job_id = %id, "Job not found");
                    (
                        StatusCode::NOT_FOUND,
                        ErrorResponse::with_details("Job not found", format!("Job ID: {id}")),
                    )
                }
                JobError::NotRunning(id) => {
                    tracing::warn!(job_id = %id, "Job is not running");
                    (
                        StatusCode::CONFLICT,
                        ErrorResponse::with_details("Job is not running", format!("Job ID: {id}")),
                    )
                }
                JobError::AtCapacity { limit } => {
                    tracing::warn!(limit, "Build capacity reached");
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        ErrorResponse::with_details(
                            "Too many concurrent builds",
                            format!("Limit: {limit}"),
                        ),
                    )
                }
                JobError::Dependency(msg) => {
                    tracing::error!(error = %msg, "Required tool unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        ErrorResponse::with_details("Required tool unavailable", msg.clone()),
                    )
                }
                JobError::Launch(source) => {
                    tracing::error!(error = %source, "Failed to launch process");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details("Failed to start job", source.to_string()),
                    )
                }
                JobError::Io(source) => {
                    tracing::error!(error = %source, "IO error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details("IO error", source.to_string()),
                    )
                }
                JobError::CancelFailed { id, reason } => {
                    tracing::error!(job_id = %id, reason = %reason, "Cancellation failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details("Failed to cancel job", reason.clone()),
                    )
                }
            },
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ee_forge_jobs::JobId;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            status_of(JobError::Validation("bad".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(JobError::NotFound(JobId::new()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(JobError::NotRunning(JobId::new()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(JobError::AtCapacity { limit: 3 }.into()),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(JobError::Dependency("podman missing".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ApiError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_response_omits_empty_details() {
        let json = serde_json::to_string(&ErrorResponse::new("oops")).unwrap();
        assert_eq!(json, r#"{"error":"oops"}"#);

        let json =
            serde_json::to_string(&ErrorResponse::with_details("oops", "context")).unwrap();
        assert!(json.contains("\"details\":\"context\""));
    }
}
