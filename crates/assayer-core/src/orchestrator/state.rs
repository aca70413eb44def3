//! Shared orchestrator state and the execution lifecycle.
//!
//! `OrchestratorState` owns every job and execution in memory, the running
//! registry (at most one in-flight execution per job) and the collaborators
//! an execution needs. The in-memory collections are authoritative: after
//! each change the affected collection is written back whole, and a failed
//! write is logged and retried implicitly by the next change.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use assayer_types::config::OrchestratorConfig;
use assayer_types::event::OrchestratorEvent;
use assayer_types::execution::{Execution, ExecutionStatus, LogLevel, TriggeredBy};
use assayer_types::job::Job;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregate::ResultAggregator;
use crate::coordinator::{CoordinatedRun, Coordinator};
use crate::event::EventBus;
use crate::executor::ExecutionContext;
use crate::notify::{self, BoxNotifier};
use crate::repository::OrchestratorRepository;
use crate::schedule::TriggerScheduler;
use crate::schedule::trigger::{FireReason, TriggerCandidate, TriggerTarget};
use crate::supervisor::{AttemptError, RetryPolicy, SupervisedOutcome, Supervisor, SupervisorEvent};

/// Registry entry for a job's in-flight execution.
pub(crate) struct RunningExecution {
    pub execution_id: Uuid,
    pub cancel: CancellationToken,
    pub status: watch::Sender<ExecutionStatus>,
}

pub(crate) struct OrchestratorState<R: OrchestratorRepository + 'static> {
    pub config: OrchestratorConfig,
    pub repo: R,
    pub jobs: DashMap<Uuid, Job>,
    pub executions: DashMap<Uuid, Execution>,
    /// Keyed by job id.
    pub running: DashMap<Uuid, RunningExecution>,
    pub coordinator: Coordinator,
    pub aggregator: ResultAggregator,
    pub notifier: BoxNotifier,
    pub events: EventBus,
    pub scheduler: TriggerScheduler,
    /// Serializes job name checks with inserts.
    pub job_names: Mutex<()>,
    /// Notifications still being delivered.
    notifications: Mutex<JoinSet<()>>,
    persist_lock: tokio::sync::Mutex<()>,
    weak: Weak<Self>,
}

impl<R: OrchestratorRepository + 'static> OrchestratorState<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        repo: R,
        jobs: Vec<Job>,
        executions: Vec<Execution>,
        coordinator: Coordinator,
        notifier: BoxNotifier,
        events: EventBus,
    ) -> Arc<Self> {
        let aggregator = ResultAggregator::new(config.weights);
        let scheduler =
            TriggerScheduler::new(Duration::from_secs(config.poll_interval_secs));
        Arc::new_cyclic(|weak| Self {
            jobs: jobs.into_iter().map(|j| (j.id, j)).collect(),
            executions: executions.into_iter().map(|e| (e.id, e)).collect(),
            running: DashMap::new(),
            config,
            repo,
            coordinator,
            aggregator,
            notifier,
            events,
            scheduler,
            job_names: Mutex::new(()),
            notifications: Mutex::new(JoinSet::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            weak: weak.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub async fn persist_jobs(&self) {
        let _guard = self.persist_lock.lock().await;
        let mut jobs: Vec<Job> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|j| j.id);
        if let Err(e) = self.repo.save_jobs(&jobs).await {
            tracing::warn!(error = %e, count = jobs.len(), "failed to persist jobs");
        }
    }

    pub async fn persist_executions(&self) {
        let _guard = self.persist_lock.lock().await;
        let executions = self.sorted_executions();
        if let Err(e) = self.repo.save_executions(&executions).await {
            tracing::warn!(error = %e, count = executions.len(), "failed to persist executions");
        }
    }

    /// Persist from a synchronous context. The snapshot is taken when the
    /// write runs, so a later write never loses an earlier change.
    fn schedule_persist_executions(&self) {
        if let Some(state) = self.weak.upgrade() {
            tokio::spawn(async move { state.persist_executions().await });
        }
    }

    /// Every execution, oldest first.
    pub fn sorted_executions(&self) -> Vec<Execution> {
        let mut executions: Vec<Execution> =
            self.executions.iter().map(|e| e.value().clone()).collect();
        executions.sort_by_key(|e| e.id);
        executions
    }

    /// Drop the oldest terminal executions beyond the retention limit.
    pub fn prune_executions(&self) -> usize {
        let limit = self.config.max_executions_retained;
        if self.executions.len() <= limit {
            return 0;
        }
        let mut terminal: Vec<Uuid> = self
            .executions
            .iter()
            .filter(|e| e.status.is_terminal())
            .map(|e| e.id)
            .collect();
        terminal.sort();
        let excess = self.executions.len() - limit;
        let mut removed = 0;
        for id in terminal.into_iter().take(excess) {
            self.executions.remove(&id);
            removed += 1;
        }
        removed
    }

    fn update_execution<T>(&self, id: Uuid, f: impl FnOnce(&mut Execution) -> T) -> Option<T> {
        self.executions.get_mut(&id).map(|mut e| f(e.value_mut()))
    }

    fn transition(&self, execution_id: Uuid, job_id: Uuid, next: ExecutionStatus) {
        let changed = self
            .update_execution(execution_id, |e| match e.transition(next) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(%execution_id, error = %err, "ignoring status change");
                    false
                }
            })
            .unwrap_or(false);
        if changed {
            if let Some(running) = self.running.get(&job_id) {
                running.status.send_replace(next);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Triggering
    // -----------------------------------------------------------------------

    /// Claim the job and spawn its execution. `None` when the job already has
    /// an execution in flight or is disabled.
    pub fn trigger(&self, job: &Job, triggered_by: TriggeredBy) -> Option<Uuid> {
        if !job.enabled {
            tracing::debug!(job_id = %job.id, job = %job.name, "not triggering disabled job");
            return None;
        }
        let state = self.weak.upgrade()?;

        let execution = Execution::new(job, triggered_by);
        let execution_id = execution.id;
        let cancel = CancellationToken::new();
        match self.running.entry(job.id) {
            Entry::Occupied(entry) => {
                tracing::debug!(
                    job_id = %job.id,
                    running = %entry.get().execution_id,
                    "job already has an execution in flight"
                );
                return None;
            }
            Entry::Vacant(entry) => {
                // Checked under the slot lock so a concurrent delete either
                // sees this claim or makes it fail here.
                if !self.jobs.get(&job.id).is_some_and(|j| j.enabled) {
                    tracing::debug!(job_id = %job.id, job = %job.name, "job deleted or disabled before claim");
                    return None;
                }
                self.executions.insert(execution_id, execution);
                let (status, _) = watch::channel(ExecutionStatus::Pending);
                entry.insert(RunningExecution {
                    execution_id,
                    cancel: cancel.clone(),
                    status,
                });
            }
        }
        self.prune_executions();

        tracing::info!(job_id = %job.id, job = %job.name, %execution_id, ?triggered_by, "execution created");
        let span = tracing::info_span!("execution", %execution_id, job = %job.name);
        tokio::spawn(
            state
                .run_execution(job.clone(), execution_id, cancel)
                .instrument(span),
        );
        Some(execution_id)
    }

    // -----------------------------------------------------------------------
    // Execution lifecycle
    // -----------------------------------------------------------------------

    async fn run_execution(self: Arc<Self>, job: Job, execution_id: Uuid, cancel: CancellationToken) {
        let supervisor = Supervisor::new(RetryPolicy::for_job(&job, &self.config));
        let outcome = supervisor
            .run(
                &cancel,
                |attempt| self.run_attempt(&job, execution_id, attempt, &cancel),
                |event| self.on_supervisor_event(&job, execution_id, event),
            )
            .await;
        self.finish(&job, execution_id, outcome).await;
    }

    async fn run_attempt(
        &self,
        job: &Job,
        execution_id: Uuid,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<CoordinatedRun, String> {
        self.persist_executions().await;

        let mut ctx = ExecutionContext::new(execution_id);
        ctx.job_id = Some(job.id);
        ctx.attempt = attempt;
        ctx.values = job.plan.context.clone();
        ctx.cancel = cancel.child_token();

        let run = self
            .coordinator
            .run(&job.plan, &ctx)
            .await
            .map_err(|e| e.to_string())?;
        self.update_execution(execution_id, |e| {
            e.domain_results = run.domain_results.clone();
        });
        if run.succeeded() {
            Ok(run)
        } else {
            Err(run.failure_summary())
        }
    }

    fn on_supervisor_event(&self, job: &Job, execution_id: Uuid, event: SupervisorEvent) {
        match event {
            SupervisorEvent::AttemptStarted { attempt } => {
                self.transition(execution_id, job.id, ExecutionStatus::Running);
                let triggered_by = self
                    .update_execution(execution_id, |e| {
                        e.attempts = attempt;
                        e.retry_count = attempt - 1;
                        e.log(LogLevel::Info, format!("attempt {attempt} started"));
                        e.triggered_by
                    })
                    .unwrap_or(TriggeredBy::Manual);
                tracing::info!(attempt, "attempt started");
                self.events.publish(OrchestratorEvent::ExecutionStarted {
                    execution_id,
                    job_id: job.id,
                    job_name: job.name.clone(),
                    triggered_by,
                    attempt,
                });
            }
            SupervisorEvent::AttemptFailed {
                attempt,
                error,
                will_retry,
            } => {
                self.update_execution(execution_id, |e| {
                    e.log(LogLevel::Warn, format!("attempt {attempt} failed: {error}"));
                });
                self.events.publish(OrchestratorEvent::AttemptFailed {
                    execution_id,
                    attempt,
                    error,
                    will_retry,
                });
            }
            SupervisorEvent::RetryScheduled { next_attempt, delay } => {
                self.transition(execution_id, job.id, ExecutionStatus::Pending);
                let delay_ms = delay.as_millis() as u64;
                self.update_execution(execution_id, |e| {
                    e.log(
                        LogLevel::Info,
                        format!("attempt {next_attempt} scheduled in {delay_ms}ms"),
                    );
                });
                self.events.publish(OrchestratorEvent::RetryScheduled {
                    execution_id,
                    next_attempt,
                    delay_ms,
                });
                self.schedule_persist_executions();
            }
        }
    }

    async fn finish(
        &self,
        job: &Job,
        execution_id: Uuid,
        outcome: SupervisedOutcome<CoordinatedRun, String>,
    ) {
        let (status, error) = match &outcome.result {
            Ok(_) => (ExecutionStatus::Completed, None),
            Err(AttemptError::Cancelled) => (ExecutionStatus::Cancelled, Some("cancelled".to_string())),
            Err(e) => (ExecutionStatus::Failed, Some(e.to_string())),
        };

        let snapshot = self.update_execution(execution_id, |e| {
            if !e.domain_results.is_empty() {
                e.result = Some(self.aggregator.aggregate(&e.domain_results));
            }
            e.attempts = outcome.attempts;
            e.retry_count = outcome.retry_count();
            e.error = error.clone();
            if let Err(err) = e.transition(status) {
                tracing::warn!(error = %err, "forcing terminal status");
                e.status = status;
                e.completed_at = Some(Utc::now());
            }
            match &error {
                Some(message) => e.log(LogLevel::Error, format!("execution {status}: {message}")),
                None => e.log(LogLevel::Info, format!("execution {status}")),
            }
            e.clone()
        });
        self.persist_executions().await;

        let notification = snapshot.as_ref().and_then(|e| self.announce(e));

        if let Some((_, running)) = self
            .running
            .remove_if(&job.id, |_, r| r.execution_id == execution_id)
        {
            running.status.send_replace(status);
        }

        if let Some((event_type, payload)) = notification {
            self.spawn_notification(event_type, payload);
        }
    }

    /// Publish the terminal event. Returns the notification to send, if any.
    fn announce(&self, execution: &Execution) -> Option<(&'static str, serde_json::Value)> {
        let duration_ms = execution.duration_ms.unwrap_or(0);
        let event_type = match execution.status {
            ExecutionStatus::Completed => {
                let (overall_score, risk_level) = execution
                    .result
                    .as_ref()
                    .map(|r| (r.overall_score, r.risk_level))
                    .unwrap_or((0.0, assayer_types::result::RiskLevel::Critical));
                tracing::info!(overall_score, %risk_level, duration_ms, attempts = execution.attempts, "execution completed");
                self.events.publish(OrchestratorEvent::ExecutionCompleted {
                    execution_id: execution.id,
                    job_id: execution.job_id,
                    overall_score,
                    risk_level,
                    duration_ms,
                });
                notify::EXECUTION_COMPLETED
            }
            ExecutionStatus::Cancelled => {
                tracing::info!(duration_ms, "execution cancelled");
                self.events.publish(OrchestratorEvent::ExecutionCancelled {
                    execution_id: execution.id,
                    job_id: execution.job_id,
                });
                return None;
            }
            _ => {
                let error = execution.error.clone().unwrap_or_default();
                tracing::warn!(error = %error, attempts = execution.attempts, "execution failed");
                self.events.publish(OrchestratorEvent::ExecutionFailed {
                    execution_id: execution.id,
                    job_id: execution.job_id,
                    error,
                });
                notify::EXECUTION_FAILED
            }
        };

        let payload = json!({
            "execution_id": execution.id,
            "job_id": execution.job_id,
            "job_name": execution.job_name,
            "status": execution.status,
            "triggered_by": execution.triggered_by,
            "attempts": execution.attempts,
            "retry_count": execution.retry_count,
            "duration_ms": execution.duration_ms,
            "error": execution.error,
            "overall_score": execution.result.as_ref().map(|r| r.overall_score),
            "risk_level": execution.result.as_ref().map(|r| r.risk_level),
        });
        Some((event_type, payload))
    }

    /// Deliver a notification off the execution path, bounded by the
    /// configured timeout.
    fn spawn_notification(&self, event_type: &'static str, payload: serde_json::Value) {
        let Some(state) = self.weak.upgrade() else {
            return;
        };
        let timeout = Duration::from_secs(self.config.notification_timeout_secs);
        let task = async move {
            match tokio::time::timeout(timeout, state.notifier.notify(event_type, &payload)).await {
                Ok(Ok(delivery)) => {
                    tracing::debug!(event_type, channels = ?delivery.channels, "notification delivered");
                }
                Ok(Err(e)) => {
                    tracing::warn!(event_type, error = %e, "notification failed");
                }
                Err(_) => {
                    tracing::warn!(event_type, timeout_secs = timeout.as_secs(), "notification timed out");
                }
            }
        };

        let mut pending = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while pending.try_join_next().is_some() {}
        pending.spawn(task.in_current_span());
    }

    /// Wait for every notification still being delivered.
    pub async fn flush_notifications(&self) {
        let mut pending = {
            let mut guard = self
                .notifications
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        while pending.join_next().await.is_some() {}
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Most recent execution start per job, overall and scheduler-initiated.
    fn last_starts(&self) -> HashMap<Uuid, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let mut starts: HashMap<Uuid, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
            HashMap::new();
        for execution in self.executions.iter() {
            let at = execution.started_at.unwrap_or(execution.created_at);
            let entry = starts.entry(execution.job_id).or_default();
            entry.0 = entry.0.max(Some(at));
            if execution.triggered_by == TriggeredBy::Scheduler {
                entry.1 = entry.1.max(Some(at));
            }
        }
        starts
    }

    pub fn trigger_candidates(&self) -> Vec<TriggerCandidate> {
        let starts = self.last_starts();
        let running: HashSet<Uuid> = self.running.iter().map(|r| *r.key()).collect();
        let mut candidates: Vec<TriggerCandidate> = self
            .jobs
            .iter()
            .map(|job| {
                let (last_execution_at, last_scheduled_at) =
                    starts.get(&job.id).copied().unwrap_or_default();
                TriggerCandidate {
                    job_id: job.id,
                    job_name: job.name.clone(),
                    trigger: job.trigger.clone(),
                    enabled: job.enabled,
                    running: running.contains(&job.id),
                    last_execution_at,
                    last_scheduled_at,
                }
            })
            .collect();
        candidates.sort_by_key(|c| c.job_id);
        candidates
    }
}

impl<R: OrchestratorRepository + 'static> TriggerTarget for OrchestratorState<R> {
    fn candidates(&self) -> Vec<TriggerCandidate> {
        self.trigger_candidates()
    }

    fn fire(&self, job_id: Uuid, reason: &FireReason) -> Option<Uuid> {
        let job = self.jobs.get(&job_id).map(|j| j.value().clone())?;
        let execution_id = self.trigger(&job, TriggeredBy::Scheduler)?;
        self.update_execution(execution_id, |e| {
            e.log(LogLevel::Info, format!("scheduled: {reason}"));
        });
        self.events.publish(OrchestratorEvent::SchedulerFired {
            job_id,
            execution_id,
            reason: reason.to_string(),
        });
        Some(execution_id)
    }
}
