//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use assayer_core::OrchestratorError;
use assayer_core::coordinator::CoordinatorError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors from the orchestrator API.
    Orchestrator(OrchestratorError),
    /// Missing or invalid API key.
    Unauthorized(String),
    /// Validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        AppError::Orchestrator(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Orchestrator(e @ OrchestratorError::JobNotFound(_)) => {
                (StatusCode::NOT_FOUND, "JOB_NOT_FOUND", e.to_string())
            }
            AppError::Orchestrator(e @ OrchestratorError::ExecutionNotFound(_)) => {
                (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND", e.to_string())
            }
            AppError::Orchestrator(e @ OrchestratorError::DuplicateJobName(_)) => {
                (StatusCode::CONFLICT, "NAME_CONFLICT", e.to_string())
            }
            AppError::Orchestrator(
                e @ (OrchestratorError::Configuration(_)
                | OrchestratorError::Coordinator(CoordinatorError::InvalidPlan(_))),
            ) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string()),
            AppError::Orchestrator(
                e @ (OrchestratorError::DependencyGraph(_)
                | OrchestratorError::Coordinator(
                    CoordinatorError::DependencyGraph(_) | CoordinatorError::PhaseOrder(_),
                )),
            ) => (StatusCode::UNPROCESSABLE_ENTITY, "DEPENDENCY_ERROR", e.to_string()),
            AppError::Orchestrator(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ORCHESTRATOR_ERROR", e.to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
