//! Execution inspection handlers for the REST API.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use uuid::Uuid;

use assayer_types::execution::Execution;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::ExecutionListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/executions - List executions, newest first.
pub async fn list_executions(
    _auth: Authenticated,
    State(state): State<AppState>,
    Query(query): Query<ExecutionListQuery>,
) -> Result<Json<ApiResponse<Vec<Execution>>>, AppError> {
    let start = Instant::now();
    let job_id = match &query.job {
        Some(target) => Some(state.orchestrator.resolve_job(target)?.id),
        None => None,
    };
    let filter = query.to_filter(job_id)?;
    let executions = state.orchestrator.list_executions(&filter);
    Ok(Json(
        ApiResponse::timed(executions, start).with_link("self", "/api/v1/executions"),
    ))
}

/// GET /api/v1/executions/{id} - One execution with logs and result.
pub async fn get_execution(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Execution>>, AppError> {
    let start = Instant::now();
    let id: Uuid = id
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid execution id '{id}'")))?;
    let execution = state.orchestrator.get_execution_status(id)?;
    let job_link = format!("/api/v1/jobs/{}", execution.job_id);
    Ok(Json(
        ApiResponse::timed(execution, start)
            .with_link("self", &format!("/api/v1/executions/{id}"))
            .with_link("job", &job_link),
    ))
}
