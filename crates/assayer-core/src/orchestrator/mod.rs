//! The orchestrator: the produced API over jobs and executions.
//!
//! `Orchestrator` is a cheap handle (`Arc` inside) shared by the CLI, the
//! HTTP handlers and the trigger scheduler. It validates and stores jobs,
//! claims single-flight executions, supervises them in spawned tasks and
//! answers status queries from in-memory state.

mod state;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use assayer_types::config::OrchestratorConfig;
use assayer_types::error::{ConfigurationError, RepositoryError};
use assayer_types::event::OrchestratorEvent;
use assayer_types::execution::{Execution, ExecutionFilter, ExecutionStatus, LogLevel, TriggeredBy};
use assayer_types::job::{Job, JobSpec, JobUpdate, TriggerSpec};
use assayer_types::plan::ExecutionPlan;
use assayer_types::result::{ConsolidatedResult, DomainResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::coordinator::{Coordinator, CoordinatorError};
use crate::event::EventBus;
use crate::executor::{ExecutionContext, ExecutorRegistry};
use crate::notify::BoxNotifier;
use crate::repository::OrchestratorRepository;
use crate::schedule::batch::{BatchNode, BatchPlan, DependencyGraphError, build_batches};
use crate::schedule::cron::{check_missed_runs, next_occurrence, parse_schedule, validate_schedule};
use crate::schedule::trigger::poll_once;

use state::OrchestratorState;

/// Errors returned by the produced API.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("a job named '{0}' already exists")]
    DuplicateJobName(String),

    #[error("invalid job: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    DependencyGraph(#[from] DependencyGraphError),

    #[error("failed to load persisted state: {0}")]
    Load(#[source] RepositoryError),
}

/// Snapshot answer to "what is this job doing".
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job: Job,
    /// The in-flight execution, if any.
    pub current_execution: Option<Uuid>,
    pub current_status: Option<ExecutionStatus>,
    pub last_execution: Option<Execution>,
    /// Next time the trigger scheduler would fire this job.
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Outcome of a one-shot plan run.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub run_id: Uuid,
    pub succeeded: bool,
    pub cancelled: bool,
    pub batches: BatchPlan,
    pub domain_results: Vec<DomainResult>,
    pub result: ConsolidatedResult,
}

/// One job of a batched trigger.
#[derive(Debug, Clone, Serialize)]
pub struct BatchedJobRun {
    pub batch: usize,
    pub job_id: Uuid,
    pub job_name: String,
    /// `None` when the job could not be claimed (already running, disabled).
    pub execution: Option<Execution>,
}

pub struct Orchestrator<R: OrchestratorRepository + 'static> {
    state: Arc<OrchestratorState<R>>,
}

impl<R: OrchestratorRepository + 'static> Clone for Orchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<R: OrchestratorRepository + 'static> Orchestrator<R> {
    /// Load persisted state and build the orchestrator.
    ///
    /// Executions beyond `max_executions_retained` are pruned (oldest first),
    /// and executions left non-terminal by a previous process are marked
    /// FAILED. Unreadable state is the only fatal error.
    pub async fn load(
        config: OrchestratorConfig,
        repo: R,
        executors: ExecutorRegistry,
        notifier: BoxNotifier,
    ) -> Result<Self, OrchestratorError> {
        let jobs = repo.load_jobs().await.map_err(OrchestratorError::Load)?;
        let mut executions = repo.load_executions().await.map_err(OrchestratorError::Load)?;
        executions.sort_by_key(|e| e.id);

        let excess = executions
            .len()
            .saturating_sub(config.max_executions_retained);
        executions.drain(..excess);

        let mut interrupted = 0;
        for execution in executions.iter_mut().filter(|e| !e.status.is_terminal()) {
            mark_interrupted(execution);
            interrupted += 1;
        }

        let events = EventBus::new(config.event_capacity);
        let coordinator =
            Coordinator::new(executors, events.clone()).with_batch_mode(config.batch_mode);
        let job_count = jobs.len();
        let execution_count = executions.len();
        let state = OrchestratorState::new(
            config,
            repo,
            jobs,
            executions,
            coordinator,
            notifier,
            events,
        );
        if excess > 0 || interrupted > 0 {
            state.persist_executions().await;
        }
        tracing::info!(
            jobs = job_count,
            executions = execution_count,
            pruned = excess,
            interrupted,
            "orchestrator state loaded"
        );

        let orchestrator = Self { state };
        orchestrator.log_missed_runs(Utc::now());
        Ok(orchestrator)
    }

    fn log_missed_runs(&self, now: DateTime<Utc>) {
        let candidates = self.state.trigger_candidates();
        let schedules: Vec<(Uuid, String, Option<DateTime<Utc>>)> = candidates
            .into_iter()
            .filter(|c| c.enabled)
            .filter_map(|c| match c.trigger {
                TriggerSpec::Cron { expression } => Some((c.job_id, expression, c.last_scheduled_at)),
                _ => None,
            })
            .collect();
        for missed in check_missed_runs(&schedules, now) {
            tracing::info!(
                job_id = %missed.job_id,
                missed = missed.occurrences.len(),
                first = ?missed.occurrences.first(),
                "cron occurrences missed while stopped; at most one catch-up run will fire"
            );
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.state.config
    }

    pub fn events(&self) -> &EventBus {
        &self.state.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.state.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    pub async fn create_job(&self, spec: JobSpec) -> Result<Job, OrchestratorError> {
        let job = spec
            .into_builder(
                self.state.config.default_timeout_secs,
                self.state.config.default_max_retries,
            )
            .build()?;
        self.validate_job(&job)?;
        self.insert_job(job.clone())?;
        self.state.persist_jobs().await;
        tracing::info!(job_id = %job.id, job = %job.name, "job created");
        Ok(job)
    }

    pub async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<Job, OrchestratorError> {
        let job = self.get_job(job_id)?.apply_update(update)?;
        self.validate_job(&job)?;
        self.insert_job(job.clone())?;
        self.state.persist_jobs().await;
        tracing::info!(job_id = %job.id, job = %job.name, "job updated");
        Ok(job)
    }

    /// Delete a job, then cancel and await its in-flight execution.
    ///
    /// The job leaves the registry first, so neither the scheduler nor a
    /// manual trigger can start it again while the cancellation drains.
    /// Past executions stay in the history.
    pub async fn delete_job(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        let (_, job) = self
            .state
            .jobs
            .remove(&job_id)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        self.state.persist_jobs().await;

        let in_flight = self.state.running.get(&job_id).map(|r| {
            r.cancel.cancel();
            r.execution_id
        });
        if let Some(execution_id) = in_flight {
            if let Some(mut execution) = self.state.executions.get_mut(&execution_id) {
                execution.log(LogLevel::Warn, "cancelled: job deleted");
            }
            tracing::info!(%job_id, %execution_id, "cancelling execution of deleted job");
            self.wait_for_execution(execution_id).await?;
        }
        tracing::info!(job_id = %job.id, job = %job.name, "job deleted");
        Ok(job)
    }

    pub fn get_job(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        self.state
            .jobs
            .get(&job_id)
            .map(|j| j.value().clone())
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Look a job up by id or by name.
    pub fn resolve_job(&self, id_or_name: &str) -> Result<Job, OrchestratorError> {
        if let Ok(id) = id_or_name.parse::<Uuid>() {
            if let Ok(job) = self.get_job(id) {
                return Ok(job);
            }
        }
        self.state
            .jobs
            .iter()
            .find(|j| j.name == id_or_name)
            .map(|j| j.value().clone())
            .ok_or_else(|| OrchestratorError::JobNotFound(id_or_name.to_string()))
    }

    /// Every job, ordered by name.
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.state.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    fn validate_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        if let TriggerSpec::Cron { expression } = &job.trigger {
            validate_schedule(expression)?;
        }
        let batches = self.state.coordinator.batches(&job.plan)?;
        if batches.is_forced() {
            tracing::warn!(job = %job.name, "job plan has unresolvable dependencies; they will run in a forced final batch");
        }
        Ok(())
    }

    fn insert_job(&self, job: Job) -> Result<(), OrchestratorError> {
        let _guard = self
            .state
            .job_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self
            .state
            .jobs
            .iter()
            .any(|j| j.name == job.name && j.id != job.id)
        {
            return Err(OrchestratorError::DuplicateJobName(job.name));
        }
        self.state.jobs.insert(job.id, job);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Start an execution of `job_id` in the background.
    ///
    /// Returns `Ok(None)` when the job already has an execution in flight or
    /// is disabled.
    pub fn trigger_job(
        &self,
        job_id: Uuid,
        triggered_by: TriggeredBy,
    ) -> Result<Option<Uuid>, OrchestratorError> {
        let job = self.get_job(job_id)?;
        Ok(self.state.trigger(&job, triggered_by))
    }

    /// Trigger a job and wait for its execution to finish.
    pub async fn run_job(
        &self,
        job_id: Uuid,
        triggered_by: TriggeredBy,
    ) -> Result<Option<Execution>, OrchestratorError> {
        match self.trigger_job(job_id, triggered_by)? {
            Some(execution_id) => Ok(Some(self.wait_for_execution(execution_id).await?)),
            None => Ok(None),
        }
    }

    /// Wait until the execution is terminal and return it.
    pub async fn wait_for_execution(&self, execution_id: Uuid) -> Result<Execution, OrchestratorError> {
        let job_id = self
            .state
            .executions
            .get(&execution_id)
            .map(|e| e.job_id)
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))?;
        let receiver = self
            .state
            .running
            .get(&job_id)
            .filter(|r| r.execution_id == execution_id)
            .map(|r| r.status.subscribe());
        if let Some(mut receiver) = receiver {
            // A closed channel means the execution finished and its entry is gone.
            let _ = receiver.wait_for(|s| s.is_terminal()).await;
        }
        self.get_execution_status(execution_id)
    }

    /// Cancel the job's in-flight execution. Returns its id, or `None` when
    /// nothing was running. The execution turns CANCELLED once its task
    /// observes the token.
    pub fn cancel_job(&self, job_id: Uuid) -> Result<Option<Uuid>, OrchestratorError> {
        if !self.state.jobs.contains_key(&job_id) {
            return Err(OrchestratorError::JobNotFound(job_id.to_string()));
        }
        let cancelled = self.state.running.get(&job_id).map(|r| {
            r.cancel.cancel();
            r.execution_id
        });
        if let Some(execution_id) = cancelled {
            if let Some(mut execution) = self.state.executions.get_mut(&execution_id) {
                execution.log(LogLevel::Warn, "cancellation requested");
            }
            tracing::info!(%job_id, %execution_id, "cancellation requested");
        }
        Ok(cancelled)
    }

    pub fn get_job_status(&self, job_id: Uuid) -> Result<JobStatus, OrchestratorError> {
        let job = self.get_job(job_id)?;
        let (current_execution, current_status) = self
            .state
            .running
            .get(&job_id)
            .map(|r| (Some(r.execution_id), Some(*r.status.borrow())))
            .unwrap_or((None, None));
        let last_execution = self
            .state
            .executions
            .iter()
            .filter(|e| e.job_id == job_id)
            .max_by_key(|e| e.id)
            .map(|e| e.value().clone());
        let next_run_at = next_run_at(&job, last_execution.as_ref(), Utc::now());
        Ok(JobStatus {
            job,
            current_execution,
            current_status,
            last_execution,
            next_run_at,
        })
    }

    pub fn get_execution_status(&self, execution_id: Uuid) -> Result<Execution, OrchestratorError> {
        self.state
            .executions
            .get(&execution_id)
            .map(|e| e.value().clone())
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))
    }

    /// Executions matching `filter`, newest first.
    pub fn list_executions(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        let mut executions: Vec<Execution> = self
            .state
            .executions
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        executions.sort_by(|a, b| b.id.cmp(&a.id));
        if let Some(limit) = filter.limit {
            executions.truncate(limit);
        }
        executions
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    /// Start the trigger scheduler. Returns `false` if already running.
    pub async fn start_scheduler(&self) -> bool {
        self.state
            .scheduler
            .start(Arc::downgrade(&self.state))
            .await
    }

    /// Stop the trigger scheduler and wait for its loop to exit.
    pub async fn stop_scheduler(&self) -> bool {
        self.state.scheduler.stop().await
    }

    pub async fn scheduler_running(&self) -> bool {
        self.state.scheduler.is_running().await
    }

    /// Run one scheduler pass at `now` and return `(job_id, execution_id)`
    /// for every job fired.
    pub fn poll_triggers(&self, now: DateTime<Utc>) -> Vec<(Uuid, Uuid)> {
        let window = chrono::Duration::from_std(self.state.scheduler.poll_interval())
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        poll_once(&*self.state, now, window)
    }

    /// Stop the scheduler, cancel every in-flight execution and wait for
    /// them to settle.
    pub async fn shutdown(&self) {
        self.stop_scheduler().await;
        let in_flight: Vec<Uuid> = self
            .state
            .running
            .iter()
            .map(|r| {
                r.cancel.cancel();
                r.execution_id
            })
            .collect();
        for execution_id in in_flight {
            if let Err(e) = self.wait_for_execution(execution_id).await {
                tracing::warn!(%execution_id, error = %e, "failed to await execution during shutdown");
            }
        }
        self.flush_notifications().await;
        tracing::info!("orchestrator shut down");
    }

    /// Wait until every pending notification is delivered or timed out.
    pub async fn flush_notifications(&self) {
        self.state.flush_notifications().await;
    }

    // -----------------------------------------------------------------------
    // Plans and batches
    // -----------------------------------------------------------------------

    /// Dependency batches of `plan`, without running it.
    pub fn plan_batches(&self, plan: &ExecutionPlan) -> Result<BatchPlan, OrchestratorError> {
        Ok(self.state.coordinator.batches(plan)?)
    }

    /// Run a plan once without creating a job or execution record. No retry
    /// or timeout applies.
    pub async fn run_plan(
        &self,
        plan: &ExecutionPlan,
        cancel: CancellationToken,
    ) -> Result<PlanReport, OrchestratorError> {
        let mut ctx = ExecutionContext::new(Uuid::now_v7());
        ctx.values = plan.context.clone();
        ctx.cancel = cancel;
        tracing::info!(run_id = %ctx.run_id, strategy = %plan.strategy, "running plan");

        let run = self.state.coordinator.run(plan, &ctx).await?;
        let result = self.state.aggregator.aggregate(&run.domain_results);
        Ok(PlanReport {
            run_id: ctx.run_id,
            succeeded: run.succeeded(),
            cancelled: run.cancelled,
            batches: run.batches,
            domain_results: run.domain_results,
            result,
        })
    }

    /// Run a set of jobs in dependency batches over their `dependencies`.
    ///
    /// Dependencies on jobs outside the selection are ignored. Each batch is
    /// awaited before the next starts; a failed job does not stop later
    /// batches. Jobs of the first batch carry `triggered_by`, later ones
    /// `TriggeredBy::Dependency`.
    pub async fn trigger_jobs_batched(
        &self,
        job_ids: &[Uuid],
        triggered_by: TriggeredBy,
    ) -> Result<Vec<BatchedJobRun>, OrchestratorError> {
        let jobs = job_ids
            .iter()
            .map(|id| self.get_job(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let selected: HashSet<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        let by_name: HashMap<&str, &Job> = jobs.iter().map(|j| (j.name.as_str(), j)).collect();

        let nodes: Vec<BatchNode> = jobs
            .iter()
            .map(|job| {
                let mut node = BatchNode::new(job.name.clone()).with_priority(job.priority);
                for dependency in &job.dependencies {
                    if selected.contains(dependency.as_str()) {
                        node = node.depends_on(dependency.clone());
                    } else {
                        tracing::debug!(job = %job.name, %dependency, "dependency outside selection ignored");
                    }
                }
                node
            })
            .collect();
        let plan = build_batches(&nodes, self.state.config.batch_mode)?;

        let mut runs = Vec::new();
        for batch in &plan.batches {
            let by = if batch.index == 0 {
                triggered_by
            } else {
                TriggeredBy::Dependency
            };
            let mut started = Vec::new();
            for name in &batch.workloads {
                let Some(job) = by_name.get(name.as_str()) else {
                    continue;
                };
                match self.state.trigger(job, by) {
                    Some(execution_id) => started.push((*job, execution_id)),
                    None => runs.push(BatchedJobRun {
                        batch: batch.index,
                        job_id: job.id,
                        job_name: job.name.clone(),
                        execution: None,
                    }),
                }
            }
            for (job, execution_id) in started {
                let execution = self.wait_for_execution(execution_id).await?;
                if execution.status != ExecutionStatus::Completed {
                    tracing::warn!(job = %job.name, status = %execution.status, "batched job did not complete");
                }
                runs.push(BatchedJobRun {
                    batch: batch.index,
                    job_id: job.id,
                    job_name: job.name.clone(),
                    execution: Some(execution),
                });
            }
        }
        Ok(runs)
    }
}

fn mark_interrupted(execution: &mut Execution) {
    let now = Utc::now();
    tracing::warn!(execution_id = %execution.id, status = %execution.status, "marking interrupted execution as failed");
    execution.status = ExecutionStatus::Failed;
    execution.completed_at = Some(now);
    execution.error = Some("interrupted: the process stopped before the execution finished".to_string());
    execution.log(LogLevel::Error, "interrupted by process restart");
}

fn next_run_at(
    job: &Job,
    last_execution: Option<&Execution>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !job.enabled {
        return None;
    }
    match &job.trigger {
        TriggerSpec::Manual => None,
        TriggerSpec::Cron { expression } => parse_schedule(expression)
            .ok()
            .and_then(|cron| next_occurrence(&cron, now)),
        TriggerSpec::Interval { seconds } => {
            let due = last_execution
                .map(|e| e.started_at.unwrap_or(e.created_at))
                .map(|at| {
                    i64::try_from(*seconds)
                        .ok()
                        .and_then(chrono::Duration::try_seconds)
                        .and_then(|interval| at.checked_add_signed(interval))
                });
            match due {
                None => Some(now),
                // Beyond the representable range: never due.
                Some(None) => None,
                Some(Some(due)) => Some(due.max(now)),
            }
        }
    }
}
