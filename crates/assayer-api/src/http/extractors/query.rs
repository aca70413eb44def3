//! Query parameter extractors for list endpoints.

use serde::Deserialize;

use assayer_types::execution::ExecutionFilter;

use crate::http::error::AppError;

/// Query parameters for the execution list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct ExecutionListQuery {
    /// Job name or ID.
    pub job: Option<String>,
    /// pending, running, completed, failed or cancelled.
    pub status: Option<String>,
    /// manual, scheduler, api or dependency.
    pub triggered_by: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl ExecutionListQuery {
    /// Build a filter; `job_id` is resolved by the caller.
    pub fn to_filter(&self, job_id: Option<uuid::Uuid>) -> Result<ExecutionFilter, AppError> {
        let status = match &self.status {
            Some(s) => Some(s.parse().map_err(AppError::Validation)?),
            None => None,
        };
        let triggered_by = match &self.triggered_by {
            Some(t) => Some(t.parse().map_err(AppError::Validation)?),
            None => None,
        };
        Ok(ExecutionFilter {
            job_id,
            status,
            triggered_by,
            limit: Some(self.limit),
        })
    }
}
