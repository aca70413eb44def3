//! Execution tracking types.
//!
//! An `Execution` is one run of a `Job`. Its status follows a small state
//! machine enforced by [`ExecutionStatus::can_transition_to`]:
//!
//! ```text
//! PENDING -> RUNNING -> COMPLETED | FAILED
//!    ^          |
//!    +----------+   (retry scheduled)
//! PENDING | RUNNING -> CANCELLED
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::job::Job;
use crate::result::{ConsolidatedResult, DomainResult};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Pending)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// Attempted an illegal status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid execution transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

/// Who or what started an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Manual,
    Scheduler,
    Api,
    Dependency,
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggeredBy::Manual => "manual",
            TriggeredBy::Scheduler => "scheduler",
            TriggeredBy::Api => "api",
            TriggeredBy::Dependency => "dependency",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(TriggeredBy::Manual),
            "scheduler" => Ok(TriggeredBy::Scheduler),
            "api" => Ok(TriggeredBy::Api),
            "dependency" => Ok(TriggeredBy::Dependency),
            other => Err(format!("unknown trigger origin '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A timestamped line in an execution's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// One run of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub job_id: Uuid,
    pub job_name: String,
    pub status: ExecutionStatus,
    pub triggered_by: TriggeredBy,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Attempts beyond the first. Never exceeds the job's `max_retries`.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ConsolidatedResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_results: Vec<DomainResult>,
    /// Terminal error. Intermediate attempt failures only appear in `logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<ExecutionLogEntry>,
}

impl Execution {
    /// A fresh PENDING execution for `job`.
    pub fn new(job: &Job, triggered_by: TriggeredBy) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id: job.id,
            job_name: job.name.clone(),
            status: ExecutionStatus::Pending,
            triggered_by,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            retry_count: 0,
            attempts: 0,
            result: None,
            domain_results: Vec::new(),
            error: None,
            logs: Vec::new(),
        }
    }

    /// Move to `next`, stamping `started_at` on the first RUNNING and
    /// `completed_at`/`duration_ms` on any terminal state.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        if next == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
            let start = self.started_at.unwrap_or(self.created_at);
            self.duration_ms = Some((now - start).num_milliseconds().max(0) as u64);
        }
        self.status = next;
        Ok(())
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(ExecutionLogEntry {
            at: Utc::now(),
            level,
            message: message.into(),
        });
    }
}

/// Filter for listing executions. Empty filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    #[serde(default)]
    pub job_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default)]
    pub triggered_by: Option<TriggeredBy>,
    /// Maximum number of results, newest first.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &Execution) -> bool {
        self.job_id.is_none_or(|id| execution.job_id == id)
            && self.status.is_none_or(|s| execution.status == s)
            && self.triggered_by.is_none_or(|t| execution.triggered_by == t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobBuilder;
    use crate::plan::{Domain, DomainPlan, ExecutionPlan, Workload};

    fn job() -> Job {
        let plan = ExecutionPlan::default().with_domain(
            Domain::Compliance,
            DomainPlan::new(vec![Workload::new("soc2")]),
        );
        JobBuilder::new("audit", plan).build().unwrap()
    }

    #[test]
    fn state_machine_allows_retry_cycle() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Pending));
        assert!(Running.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn transition_stamps_times() {
        let mut exec = Execution::new(&job(), TriggeredBy::Manual);
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert!(exec.started_at.is_none());

        exec.transition(ExecutionStatus::Running).unwrap();
        let started = exec.started_at.unwrap();
        exec.transition(ExecutionStatus::Pending).unwrap();
        exec.transition(ExecutionStatus::Running).unwrap();
        assert_eq!(exec.started_at, Some(started));

        exec.transition(ExecutionStatus::Completed).unwrap();
        assert!(exec.completed_at.is_some());
        assert!(exec.duration_ms.is_some());

        let err = exec.transition(ExecutionStatus::Running).unwrap_err();
        assert_eq!(err.from, ExecutionStatus::Completed);
    }

    #[test]
    fn filter_matches_fields() {
        let job = job();
        let exec = Execution::new(&job, TriggeredBy::Scheduler);
        assert!(ExecutionFilter::default().matches(&exec));
        assert!(
            ExecutionFilter {
                job_id: Some(job.id),
                triggered_by: Some(TriggeredBy::Scheduler),
                ..Default::default()
            }
            .matches(&exec)
        );
        assert!(
            !ExecutionFilter {
                status: Some(ExecutionStatus::Failed),
                ..Default::default()
            }
            .matches(&exec)
        );
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("RUNNING".parse::<ExecutionStatus>(), Ok(ExecutionStatus::Running));
        assert!("bogus".parse::<ExecutionStatus>().is_err());
    }
}
