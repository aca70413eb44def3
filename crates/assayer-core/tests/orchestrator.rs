//! End-to-end tests of job executions: retries, timeouts, single-flight,
//! cancellation, scheduling and persistence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assayer_core::executor::{DomainExecutor, ExecutionContext, ExecutorRegistry};
use assayer_core::notify::{BoxNotifier, DeliveryResult, NotificationError, Notifier};
use assayer_core::repository::{InMemoryRepository, OrchestratorRepository};
use assayer_core::{Orchestrator, OrchestratorError};
use assayer_types::config::OrchestratorConfig;
use assayer_types::event::OrchestratorEvent;
use assayer_types::execution::{Execution, ExecutionFilter, ExecutionStatus, TriggeredBy};
use assayer_types::job::{JobBuilder, JobSpec, TriggerSpec};
use assayer_types::plan::{Domain, DomainPlan, ExecutionPlan, Workload};
use assayer_types::result::{DomainResult, RiskLevel};
use chrono::Utc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Fails its first `fail_first` calls, then passes. A hanging executor
/// blocks until cancelled, then takes `drain` to wind down.
#[derive(Clone)]
struct Scripted {
    domain: Domain,
    calls: Arc<AtomicU32>,
    fail_first: u32,
    hang: bool,
    drain: Duration,
}

impl Scripted {
    fn failing_first(fail_first: u32) -> Self {
        Self {
            domain: Domain::Functional,
            calls: Arc::new(AtomicU32::new(0)),
            fail_first,
            hang: false,
            drain: Duration::ZERO,
        }
    }

    fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::failing_first(0)
        }
    }

    fn hanging_with_drain(drain: Duration) -> Self {
        Self {
            drain,
            ..Self::hanging()
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DomainExecutor for Scripted {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn execute(&self, plan: &DomainPlan, ctx: &ExecutionContext) -> DomainResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang {
            ctx.cancel.cancelled().await;
            tokio::time::sleep(self.drain).await;
            return DomainResult::cancelled(self.domain);
        }
        if call <= self.fail_first {
            DomainResult::from_counts(self.domain, 0, 1)
        } else {
            DomainResult::from_counts(self.domain, plan.workloads.len() as u32, 0)
        }
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        event_type: &str,
        _payload: &serde_json::Value,
    ) -> Result<DeliveryResult, NotificationError> {
        self.sent.lock().unwrap().push(event_type.to_string());
        Ok(DeliveryResult {
            channels: vec!["test".to_string()],
        })
    }
}

/// Never answers within the notification timeout.
struct StalledNotifier;

impl Notifier for StalledNotifier {
    async fn notify(
        &self,
        _event_type: &str,
        _payload: &serde_json::Value,
    ) -> Result<DeliveryResult, NotificationError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(DeliveryResult {
            channels: vec!["stalled".to_string()],
        })
    }
}

fn functional_plan() -> ExecutionPlan {
    ExecutionPlan::default().with_domain(
        Domain::Functional,
        DomainPlan::new(vec![Workload::new("login"), Workload::new("checkout")]),
    )
}

fn spec(name: &str, max_retries: u32) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        max_retries: Some(max_retries),
        plan: functional_plan(),
        ..Default::default()
    }
}

async fn orchestrator_with(
    executor: Scripted,
    repo: InMemoryRepository,
    notifier: RecordingNotifier,
) -> Orchestrator<InMemoryRepository> {
    Orchestrator::load(
        OrchestratorConfig::default(),
        repo,
        ExecutorRegistry::new().with(executor),
        BoxNotifier::new(notifier),
    )
    .await
    .unwrap()
}

async fn orchestrator(executor: Scripted) -> Orchestrator<InMemoryRepository> {
    orchestrator_with(executor, InMemoryRepository::new(), RecordingNotifier::default()).await
}

async fn wait_until_running(orch: &Orchestrator<InMemoryRepository>, job_id: Uuid) {
    for _ in 0..100 {
        let status = orch.get_job_status(job_id).unwrap();
        if status.current_status == Some(ExecutionStatus::Running) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution never started");
}

// ---------------------------------------------------------------------------
// Retries and timeouts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn always_failing_job_makes_max_retries_plus_one_attempts() {
    let executor = Scripted::failing_first(u32::MAX);
    let notifier = RecordingNotifier::default();
    let orch = orchestrator_with(executor.clone(), InMemoryRepository::new(), notifier.clone()).await;
    let job = orch.create_job(spec("flaky", 2)).await.unwrap();

    let execution = orch
        .run_job(job.id, TriggeredBy::Manual)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.attempts, 3);
    assert_eq!(execution.retry_count, 2);
    assert_eq!(executor.calls(), 3);
    assert!(execution.error.as_deref().unwrap().contains("functional failed"));
    assert!(execution.completed_at.is_some());
    assert!(
        execution
            .logs
            .iter()
            .any(|l| l.message.contains("attempt 1 failed"))
    );
    orch.flush_notifications().await;
    assert_eq!(notifier.sent(), vec!["execution.failed".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn job_completes_after_k_failures_with_retry_count_k() {
    let executor = Scripted::failing_first(2);
    let notifier = RecordingNotifier::default();
    let orch = orchestrator_with(executor.clone(), InMemoryRepository::new(), notifier.clone()).await;
    let job = orch.create_job(spec("eventually", 3)).await.unwrap();
    let mut events = orch.subscribe();

    let started = tokio::time::Instant::now();
    let execution = orch
        .run_job(job.id, TriggeredBy::Api)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.retry_count, 2);
    assert_eq!(execution.attempts, 3);
    assert_eq!(execution.error, None);
    // Linear back-off: 1s after attempt 1, 2s after attempt 2.
    assert!(started.elapsed() >= Duration::from_secs(3));

    let result = execution.result.unwrap();
    assert_eq!(result.overall_score, 1.0);
    assert_eq!(result.risk_level, RiskLevel::Low);
    orch.flush_notifications().await;
    assert_eq!(notifier.sent(), vec!["execution.completed".to_string()]);

    let (mut starts, mut retries) = (0, 0);
    while let Ok(event) = events.try_recv() {
        match event {
            OrchestratorEvent::ExecutionStarted { .. } => starts += 1,
            OrchestratorEvent::RetryScheduled { .. } => retries += 1,
            _ => {}
        }
    }
    assert_eq!((starts, retries), (3, 2));
}

#[tokio::test(start_paused = true)]
async fn attempts_time_out_and_are_retried() {
    let executor = Scripted::hanging();
    let orch = orchestrator(executor.clone()).await;
    let mut spec = spec("slow", 1);
    spec.timeout_secs = Some(5);
    let job = orch.create_job(spec).await.unwrap();

    let execution = orch
        .run_job(job.id, TriggeredBy::Manual)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.attempts, 2);
    assert_eq!(executor.calls(), 2);
    assert!(execution.error.as_deref().unwrap().contains("timed out"));
}

// ---------------------------------------------------------------------------
// Single-flight and cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_trigger_of_running_job_returns_none() {
    let executor = Scripted::hanging();
    let orch = orchestrator(executor.clone()).await;
    let job = orch.create_job(spec("exclusive", 0)).await.unwrap();

    let first = orch.trigger_job(job.id, TriggeredBy::Manual).unwrap();
    assert!(first.is_some());
    assert_eq!(orch.trigger_job(job.id, TriggeredBy::Api).unwrap(), None);

    orch.cancel_job(job.id).unwrap();
    orch.wait_for_execution(first.unwrap()).await.unwrap();
    assert!(orch.trigger_job(job.id, TriggeredBy::Manual).unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn stalled_notifier_releases_the_job_slot() {
    let orch = Orchestrator::load(
        OrchestratorConfig::default(),
        InMemoryRepository::new(),
        ExecutorRegistry::new().with(Scripted::failing_first(0)),
        BoxNotifier::new(StalledNotifier),
    )
    .await
    .unwrap();
    let job = orch.create_job(spec("notified", 0)).await.unwrap();

    let first = orch
        .run_job(job.id, TriggeredBy::Manual)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, ExecutionStatus::Completed);
    assert_eq!(orch.get_job_status(job.id).unwrap().current_execution, None);

    let second = orch
        .trigger_job(job.id, TriggeredBy::Manual)
        .unwrap()
        .expect("job slot should be free once the execution is terminal");
    let execution = orch.wait_for_execution(second).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let started = tokio::time::Instant::now();
    orch.flush_notifications().await;
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(29), "{waited:?}");
    assert!(waited <= Duration::from_secs(31), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn cancelling_running_execution_stops_further_attempts() {
    let executor = Scripted::hanging();
    let notifier = RecordingNotifier::default();
    let orch = orchestrator_with(executor.clone(), InMemoryRepository::new(), notifier.clone()).await;
    let job = orch.create_job(spec("long", 3)).await.unwrap();

    let execution_id = orch
        .trigger_job(job.id, TriggeredBy::Manual)
        .unwrap()
        .unwrap();
    wait_until_running(&orch, job.id).await;

    assert_eq!(orch.cancel_job(job.id).unwrap(), Some(execution_id));
    let execution = orch.wait_for_execution(execution_id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.attempts, 1);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(executor.calls(), 1);
    orch.flush_notifications().await;
    assert!(notifier.sent().is_empty());
    assert_eq!(orch.cancel_job(job.id).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn deleting_a_running_job_cancels_it() {
    let orch = orchestrator(Scripted::hanging()).await;
    let job = orch.create_job(spec("doomed", 0)).await.unwrap();
    let execution_id = orch
        .trigger_job(job.id, TriggeredBy::Manual)
        .unwrap()
        .unwrap();
    wait_until_running(&orch, job.id).await;

    orch.delete_job(job.id).await.unwrap();

    assert!(orch.list_jobs().is_empty());
    let execution = orch.get_execution_status(execution_id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(matches!(
        orch.get_job_status(job.id),
        Err(OrchestratorError::JobNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn deleted_job_is_not_refired_while_its_execution_drains() {
    let executor = Scripted::hanging_with_drain(Duration::from_secs(30));
    let orch = orchestrator(executor.clone()).await;
    let mut spec = spec("every-second", 0);
    spec.trigger = TriggerSpec::Interval { seconds: 1 };
    let job = orch.create_job(spec).await.unwrap();
    let execution_id = orch
        .trigger_job(job.id, TriggeredBy::Manual)
        .unwrap()
        .unwrap();
    wait_until_running(&orch, job.id).await;

    let racing = async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let listed = orch.list_jobs().len();
        let fired = orch.poll_triggers(Utc::now() + chrono::Duration::hours(1));
        let manual = orch.trigger_job(job.id, TriggeredBy::Manual);
        (listed, fired, manual)
    };
    let (deleted, (listed, fired, manual)) = tokio::join!(orch.delete_job(job.id), racing);

    assert_eq!(deleted.unwrap().id, job.id);
    assert_eq!(listed, 0);
    assert!(fired.is_empty());
    assert!(matches!(manual, Err(OrchestratorError::JobNotFound(_))));

    assert!(orch.poll_triggers(Utc::now() + chrono::Duration::hours(2)).is_empty());
    assert_eq!(executor.calls(), 1);
    let executions = orch.list_executions(&ExecutionFilter::default());
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].id, execution_id);
    assert_eq!(executions[0].status, ExecutionStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Listing and batches of jobs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn executions_are_listed_newest_first() {
    let orch = orchestrator(Scripted::failing_first(0)).await;
    let job = orch.create_job(spec("repeat", 0)).await.unwrap();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let execution = orch
            .run_job(job.id, TriggeredBy::Manual)
            .await
            .unwrap()
            .unwrap();
        ids.push(execution.id);
    }

    let listed: Vec<Uuid> = orch
        .list_executions(&ExecutionFilter {
            job_id: Some(job.id),
            limit: Some(2),
            ..Default::default()
        })
        .into_iter()
        .map(|e| e.id)
        .collect();
    ids.sort();
    assert_eq!(listed, vec![ids[2], ids[1]]);

    let status = orch.get_job_status(job.id).unwrap();
    assert_eq!(status.last_execution.unwrap().id, ids[2]);
    assert_eq!(status.current_execution, None);
    assert_eq!(status.next_run_at, None);
}

#[tokio::test(start_paused = true)]
async fn batched_trigger_follows_job_dependencies() {
    let orch = orchestrator(Scripted::failing_first(0)).await;
    let build = orch.create_job(spec("build", 0)).await.unwrap();
    let mut deploy = spec("deploy", 0);
    deploy.dependencies = vec!["build".to_string()];
    let deploy = orch.create_job(deploy).await.unwrap();
    let mut verify = spec("verify", 0);
    verify.dependencies = vec!["deploy".to_string(), "not-selected".to_string()];
    let verify = orch.create_job(verify).await.unwrap();

    let runs = orch
        .trigger_jobs_batched(&[verify.id, deploy.id, build.id], TriggeredBy::Manual)
        .await
        .unwrap();

    let order: Vec<(usize, &str)> = runs
        .iter()
        .map(|r| (r.batch, r.job_name.as_str()))
        .collect();
    assert_eq!(order, vec![(0, "build"), (1, "deploy"), (2, "verify")]);
    for run in &runs {
        let execution = run.execution.as_ref().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }
    assert_eq!(
        runs[0].execution.as_ref().unwrap().triggered_by,
        TriggeredBy::Manual
    );
    assert_eq!(
        runs[2].execution.as_ref().unwrap().triggered_by,
        TriggeredBy::Dependency
    );
}

// ---------------------------------------------------------------------------
// Trigger scheduler
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn interval_jobs_fire_when_due() {
    let orch = orchestrator(Scripted::failing_first(0)).await;
    let mut spec = spec("every-5m", 0);
    spec.trigger = TriggerSpec::Interval { seconds: 300 };
    let job = orch.create_job(spec).await.unwrap();
    let manual = orch.create_job(self::spec("manual", 0)).await.unwrap();

    let now = Utc::now();
    let fired = orch.poll_triggers(now);
    assert_eq!(fired.len(), 1);
    let (job_id, execution_id) = fired[0];
    assert_eq!(job_id, job.id);
    let execution = orch.wait_for_execution(execution_id).await.unwrap();
    assert_eq!(execution.triggered_by, TriggeredBy::Scheduler);
    assert!(
        execution
            .logs
            .iter()
            .any(|l| l.message.starts_with("scheduled:"))
    );

    assert!(orch.poll_triggers(Utc::now()).is_empty());
    let later = Utc::now() + chrono::Duration::seconds(301);
    let fired = orch.poll_triggers(later);
    assert_eq!(fired.len(), 1);
    assert_ne!(fired[0].0, manual.id);
    orch.wait_for_execution(fired[0].1).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cron_jobs_fire_once_per_occurrence() {
    let orch = orchestrator(Scripted::failing_first(0)).await;
    let mut spec = spec("minutely", 0);
    spec.trigger = TriggerSpec::Cron {
        expression: "every minute".to_string(),
    };
    orch.create_job(spec).await.unwrap();

    let now = Utc::now();
    let fired = orch.poll_triggers(now);
    assert_eq!(fired.len(), 1);
    orch.wait_for_execution(fired[0].1).await.unwrap();

    assert!(orch.poll_triggers(now).is_empty());
}

#[tokio::test(start_paused = true)]
async fn scheduler_start_and_stop_are_idempotent() {
    let orch = orchestrator(Scripted::failing_first(0)).await;
    assert!(orch.start_scheduler().await);
    assert!(!orch.start_scheduler().await);
    assert!(orch.scheduler_running().await);
    assert!(orch.stop_scheduler().await);
    assert!(!orch.stop_scheduler().await);
    assert!(!orch.scheduler_running().await);
}

#[tokio::test(start_paused = true)]
async fn running_scheduler_fires_interval_job() {
    let orch = orchestrator(Scripted::failing_first(0)).await;
    let mut spec = spec("background", 0);
    spec.trigger = TriggerSpec::Interval { seconds: 3600 };
    let job = orch.create_job(spec).await.unwrap();

    orch.start_scheduler().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    orch.shutdown().await;

    let executions = orch.list_executions(&ExecutionFilter {
        job_id: Some(job.id),
        ..Default::default()
    });
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].triggered_by, TriggeredBy::Scheduler);
    assert!(executions[0].status.is_terminal());
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn state_survives_reload() {
    let repo = InMemoryRepository::new();
    let orch = orchestrator_with(
        Scripted::failing_first(0),
        repo.clone(),
        RecordingNotifier::default(),
    )
    .await;
    let job = orch.create_job(spec("persisted", 0)).await.unwrap();
    let execution = orch
        .run_job(job.id, TriggeredBy::Manual)
        .await
        .unwrap()
        .unwrap();

    let stored = repo.stored_executions().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, ExecutionStatus::Completed);

    let reloaded = orchestrator_with(
        Scripted::failing_first(0),
        repo.clone(),
        RecordingNotifier::default(),
    )
    .await;
    assert_eq!(reloaded.get_job(job.id).unwrap().name, "persisted");
    assert_eq!(
        reloaded.get_execution_status(execution.id).unwrap().status,
        ExecutionStatus::Completed
    );
}

#[tokio::test]
async fn load_marks_interrupted_and_prunes_old_executions() {
    let job = JobBuilder::new("restored", functional_plan()).build().unwrap();
    let mut finished: Vec<Execution> = (0..3)
        .map(|_| {
            let mut e = Execution::new(&job, TriggeredBy::Manual);
            e.transition(ExecutionStatus::Running).unwrap();
            e.transition(ExecutionStatus::Completed).unwrap();
            e
        })
        .collect();
    let interrupted = Execution::new(&job, TriggeredBy::Scheduler);
    let interrupted_id = interrupted.id;
    finished.push(interrupted);
    let mut all_ids: Vec<Uuid> = finished.iter().map(|e| e.id).collect();
    all_ids.sort();

    let repo = InMemoryRepository::with_state(vec![job.clone()], finished);
    let config = OrchestratorConfig {
        max_executions_retained: 2,
        ..OrchestratorConfig::default()
    };
    let orch = Orchestrator::load(
        config,
        repo.clone(),
        ExecutorRegistry::new(),
        BoxNotifier::new(RecordingNotifier::default()),
    )
    .await
    .unwrap();

    let kept: Vec<Uuid> = repo.load_executions().await.unwrap().iter().map(|e| e.id).collect();
    assert_eq!(kept, all_ids[2..].to_vec());
    assert_eq!(orch.list_executions(&ExecutionFilter::default()).len(), 2);

    if kept.contains(&interrupted_id) {
        let execution = orch.get_execution_status(interrupted_id).unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.unwrap().starts_with("interrupted"));
    }
}

#[tokio::test(start_paused = true)]
async fn failing_repository_does_not_stop_executions() {
    let repo = InMemoryRepository::new();
    let orch = orchestrator_with(
        Scripted::failing_first(0),
        repo.clone(),
        RecordingNotifier::default(),
    )
    .await;
    let job = orch.create_job(spec("unsaved", 0)).await.unwrap();
    repo.set_fail_saves(true);

    let execution = orch
        .run_job(job.id, TriggeredBy::Manual)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(repo.stored_executions().await.is_empty());
}
