//! Job CRUD, trigger and cancel handlers for the REST API.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};

use assayer_core::orchestrator::JobStatus;
use assayer_core::schedule::BatchPlan;
use assayer_types::execution::TriggeredBy;
use assayer_types::job::{Job, JobSpec, JobUpdate};
use assayer_types::plan::ExecutionPlan;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/jobs - Create a job.
pub async fn create_job(
    _auth: Authenticated,
    State(state): State<AppState>,
    Json(body): Json<JobSpec>,
) -> Result<Json<ApiResponse<Job>>, AppError> {
    let start = Instant::now();
    let job = state.orchestrator.create_job(body).await?;
    let self_link = format!("/api/v1/jobs/{}", job.id);
    let trigger_link = format!("{self_link}/trigger");
    Ok(Json(
        ApiResponse::timed(job, start)
            .with_link("self", &self_link)
            .with_link("trigger", &trigger_link),
    ))
}

/// GET /api/v1/jobs - List jobs by name.
pub async fn list_jobs(
    _auth: Authenticated,
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<Job>>> {
    let start = Instant::now();
    let jobs = state.orchestrator.list_jobs();
    Json(ApiResponse::timed(jobs, start).with_link("self", "/api/v1/jobs"))
}

/// GET /api/v1/jobs/{id} - Job with its current/last execution (ID or name).
pub async fn get_job(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
) -> Result<Json<ApiResponse<JobStatus>>, AppError> {
    let start = Instant::now();
    let job = state.orchestrator.resolve_job(&id_or_name)?;
    let status = state.orchestrator.get_job_status(job.id)?;
    let executions_link = format!("/api/v1/executions?job={}", job.id);
    Ok(Json(
        ApiResponse::timed(status, start)
            .with_link("self", &format!("/api/v1/jobs/{}", job.id))
            .with_link("executions", &executions_link),
    ))
}

/// PUT /api/v1/jobs/{id} - Partially update a job.
pub async fn update_job(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
    Json(body): Json<JobUpdate>,
) -> Result<Json<ApiResponse<Job>>, AppError> {
    let start = Instant::now();
    let job = state.orchestrator.resolve_job(&id_or_name)?;
    let job = state.orchestrator.update_job(job.id, body).await?;
    let self_link = format!("/api/v1/jobs/{}", job.id);
    Ok(Json(ApiResponse::timed(job, start).with_link("self", &self_link)))
}

/// DELETE /api/v1/jobs/{id} - Delete a job, cancelling its execution.
pub async fn delete_job(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
) -> Result<Json<ApiResponse<Job>>, AppError> {
    let start = Instant::now();
    let job = state.orchestrator.resolve_job(&id_or_name)?;
    let job = state.orchestrator.delete_job(job.id).await?;
    Ok(Json(ApiResponse::timed(job, start)))
}

/// POST /api/v1/jobs/{id}/trigger - Start an execution in the background.
///
/// `execution_id` is null when the job is disabled or already running.
pub async fn trigger_job(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let job = state.orchestrator.resolve_job(&id_or_name)?;
    let execution_id = state.orchestrator.trigger_job(job.id, TriggeredBy::Api)?;
    tracing::info!(job = %job.name, ?execution_id, "job triggered via api");

    let mut resp = ApiResponse::timed(
        serde_json::json!({ "job_id": job.id, "execution_id": execution_id }),
        start,
    );
    if let Some(id) = execution_id {
        resp = resp.with_link("execution", &format!("/api/v1/executions/{id}"));
    }
    Ok(Json(resp))
}

/// POST /api/v1/jobs/{id}/cancel - Cancel the running execution, if any.
pub async fn cancel_job(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let job = state.orchestrator.resolve_job(&id_or_name)?;
    let execution_id = state.orchestrator.cancel_job(job.id)?;
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "job_id": job.id, "execution_id": execution_id }),
        start,
    )))
}

/// POST /api/v1/plans/batches - Dependency batches of a plan.
pub async fn plan_batches(
    _auth: Authenticated,
    State(state): State<AppState>,
    Json(plan): Json<ExecutionPlan>,
) -> Result<Json<ApiResponse<BatchPlan>>, AppError> {
    let start = Instant::now();
    let batches = state.orchestrator.plan_batches(&plan)?;
    Ok(Json(ApiResponse::timed(batches, start)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assayer_types::config::OrchestratorConfig;
    use assayer_types::plan::{Domain, DomainPlan, Workload};
    use tempfile::TempDir;

    async fn test_state(dir: &TempDir) -> AppState {
        AppState::init(dir.path().to_path_buf(), OrchestratorConfig::default())
            .await
            .unwrap()
    }

    fn spec(name: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            plan: ExecutionPlan::default().with_domain(
                Domain::Functional,
                DomainPlan::new(vec![Workload::new("smoke").with_command("true", vec![])]),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn job_crud_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let Json(created) = create_job(Authenticated, State(state.clone()), Json(spec("nightly")))
            .await
            .unwrap();
        let job = created.data.unwrap();
        assert_eq!(created.links["self"], format!("/api/v1/jobs/{}", job.id));

        let Json(listed) = list_jobs(Authenticated, State(state.clone())).await;
        assert_eq!(listed.data.unwrap().len(), 1);

        let Json(fetched) =
            get_job(Authenticated, State(state.clone()), Path("nightly".to_string()))
                .await
                .unwrap();
        assert_eq!(fetched.data.unwrap().job.id, job.id);

        let update = JobUpdate {
            max_retries: Some(5),
            ..Default::default()
        };
        let Json(updated) = update_job(
            Authenticated,
            State(state.clone()),
            Path(job.id.to_string()),
            Json(update),
        )
        .await
        .unwrap();
        assert_eq!(updated.data.unwrap().max_retries, 5);

        delete_job(Authenticated, State(state.clone()), Path(job.id.to_string()))
            .await
            .unwrap();
        let missing = get_job(Authenticated, State(state), Path(job.id.to_string())).await;
        assert!(matches!(
            missing,
            Err(AppError::Orchestrator(assayer_core::OrchestratorError::JobNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        create_job(Authenticated, State(state.clone()), Json(spec("dup")))
            .await
            .unwrap();
        let err = create_job(Authenticated, State(state), Json(spec("dup")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Orchestrator(assayer_core::OrchestratorError::DuplicateJobName(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn triggered_job_runs_to_completion() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let Json(created) = create_job(Authenticated, State(state.clone()), Json(spec("smoke")))
            .await
            .unwrap();
        let job = created.data.unwrap();

        let Json(resp) = trigger_job(Authenticated, State(state.clone()), Path(job.name.clone()))
            .await
            .unwrap();
        let data = resp.data.unwrap();
        let execution_id: uuid::Uuid =
            serde_json::from_value(data["execution_id"].clone()).unwrap();

        let execution = state
            .orchestrator
            .wait_for_execution(execution_id)
            .await
            .unwrap();
        assert_eq!(
            execution.status,
            assayer_types::execution::ExecutionStatus::Completed
        );
        assert_eq!(execution.triggered_by, TriggeredBy::Api);
        let result = execution.result.unwrap();
        assert_eq!(result.overall_score, 1.0);
    }
}
