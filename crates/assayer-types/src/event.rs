//! Event types for the Assayer orchestration event bus.
//!
//! `OrchestratorEvent` is broadcast while executions run. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::TriggeredBy;
use crate::plan::Domain;
use crate::result::{DomainStatus, RiskLevel};

/// Events emitted by the orchestrator, coordinator and trigger scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// An attempt of an execution started.
    ExecutionStarted {
        execution_id: Uuid,
        job_id: Uuid,
        job_name: String,
        triggered_by: TriggeredBy,
        attempt: u32,
    },

    /// An attempt failed or timed out.
    AttemptFailed {
        execution_id: Uuid,
        attempt: u32,
        error: String,
        will_retry: bool,
    },

    /// A retry was scheduled after a back-off delay.
    RetryScheduled {
        execution_id: Uuid,
        next_attempt: u32,
        delay_ms: u64,
    },

    ExecutionCompleted {
        execution_id: Uuid,
        job_id: Uuid,
        overall_score: f64,
        risk_level: RiskLevel,
        duration_ms: u64,
    },

    ExecutionFailed {
        execution_id: Uuid,
        job_id: Uuid,
        error: String,
    },

    ExecutionCancelled { execution_id: Uuid, job_id: Uuid },

    /// A dependency batch began inside a strategy phase. `run_id` is the
    /// execution id for job runs.
    BatchStarted {
        run_id: Uuid,
        index: usize,
        phase: String,
        workloads: Vec<String>,
    },

    /// A domain invocation was launched.
    DomainStarted {
        run_id: Uuid,
        domain: Domain,
        batch: usize,
        phase: String,
        workloads: usize,
    },

    /// A domain invocation reached a terminal result.
    DomainCompleted {
        run_id: Uuid,
        domain: Domain,
        batch: usize,
        phase: String,
        status: DomainStatus,
        score: f64,
        duration_ms: u64,
    },

    /// The trigger scheduler started an execution.
    SchedulerFired {
        job_id: Uuid,
        execution_id: Uuid,
        reason: String,
    },
}
