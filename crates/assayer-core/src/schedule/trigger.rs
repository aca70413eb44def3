//! Recurring trigger scheduler.
//!
//! A background task polls on a fixed interval and asks a [`TriggerTarget`]
//! (the orchestrator) for its jobs. Every enabled job whose cron occurrence
//! or interval has come due, and which has no execution in flight, is fired.
//! Firing only creates and hands off an execution; the loop never waits for
//! one to finish.

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use assayer_types::job::TriggerSpec;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::cron::{occurrence_in_window, parse_schedule};

// ---------------------------------------------------------------------------
// Due evaluation
// ---------------------------------------------------------------------------

/// What the trigger loop needs to know about one job.
#[derive(Debug, Clone)]
pub struct TriggerCandidate {
    pub job_id: Uuid,
    pub job_name: String,
    pub trigger: TriggerSpec,
    pub enabled: bool,
    /// The job has a non-terminal execution.
    pub running: bool,
    /// Start of the most recent execution of any origin.
    pub last_execution_at: Option<DateTime<Utc>>,
    /// Start of the most recent scheduler-initiated execution.
    pub last_scheduled_at: Option<DateTime<Utc>>,
}

/// Why a job was fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireReason {
    Cron { occurrence: DateTime<Utc> },
    Interval { elapsed_secs: Option<i64> },
}

impl fmt::Display for FireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FireReason::Cron { occurrence } => {
                write!(f, "cron occurrence {}", occurrence.to_rfc3339())
            }
            FireReason::Interval {
                elapsed_secs: Some(secs),
            } => write!(f, "interval elapsed ({secs}s since last run)"),
            FireReason::Interval { elapsed_secs: None } => {
                write!(f, "interval job has never run")
            }
        }
    }
}

/// Decide whether `candidate` is due at `now`.
///
/// Cron: due when an occurrence lies in `(since, now]`, `since` being the
/// last scheduler-initiated start or `now - poll_window`. Interval: due when
/// at least `seconds` have passed since the last execution, or there is none.
pub fn evaluate(
    candidate: &TriggerCandidate,
    now: DateTime<Utc>,
    poll_window: chrono::Duration,
) -> Option<FireReason> {
    if !candidate.enabled || candidate.running {
        return None;
    }
    match &candidate.trigger {
        TriggerSpec::Manual => None,
        TriggerSpec::Cron { expression } => {
            let cron = match parse_schedule(expression) {
                Ok(cron) => cron,
                Err(e) => {
                    tracing::warn!(job_id = %candidate.job_id, error = %e, "skipping job with invalid schedule");
                    return None;
                }
            };
            let since = candidate
                .last_scheduled_at
                .unwrap_or(now - poll_window);
            occurrence_in_window(&cron, since, now).map(|occurrence| FireReason::Cron { occurrence })
        }
        TriggerSpec::Interval { seconds } => match candidate.last_execution_at {
            None => Some(FireReason::Interval { elapsed_secs: None }),
            Some(last) => {
                // Intervals past i64::MAX seconds never come due.
                let interval = i64::try_from(*seconds).ok()?;
                let elapsed = (now - last).num_seconds();
                (elapsed >= interval).then_some(FireReason::Interval {
                    elapsed_secs: Some(elapsed),
                })
            }
        },
    }
}

/// The side of the scheduler that owns jobs and executions.
pub trait TriggerTarget: Send + Sync + 'static {
    /// Current snapshot of every job.
    fn candidates(&self) -> Vec<TriggerCandidate>;

    /// Create and hand off an execution. Returns `None` when the job could
    /// not be claimed (already running, deleted, disabled).
    fn fire(&self, job_id: Uuid, reason: &FireReason) -> Option<Uuid>;
}

/// One scheduler pass. Returns `(job_id, execution_id)` for every job fired.
pub fn poll_once<T: TriggerTarget + ?Sized>(
    target: &T,
    now: DateTime<Utc>,
    poll_window: chrono::Duration,
) -> Vec<(Uuid, Uuid)> {
    let mut fired = Vec::new();
    for candidate in target.candidates() {
        let Some(reason) = evaluate(&candidate, now, poll_window) else {
            continue;
        };
        match target.fire(candidate.job_id, &reason) {
            Some(execution_id) => {
                tracing::info!(
                    job_id = %candidate.job_id,
                    job = %candidate.job_name,
                    %execution_id,
                    %reason,
                    "scheduler fired job"
                );
                fired.push((candidate.job_id, execution_id));
            }
            None => {
                tracing::debug!(job_id = %candidate.job_id, "due job not claimed");
            }
        }
    }
    fired
}

// ---------------------------------------------------------------------------
// TriggerScheduler
// ---------------------------------------------------------------------------

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the polling task. `start` and `stop` are idempotent.
pub struct TriggerScheduler {
    poll_interval: Duration,
    handle: Mutex<Option<LoopHandle>>,
}

impl TriggerScheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            handle: Mutex::new(None),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Spawn the polling loop. Returns `false` if it was already running.
    ///
    /// The loop holds a weak reference and exits once the target is dropped.
    pub async fn start<T: TriggerTarget>(&self, target: Weak<T>) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.task.is_finished()) {
            tracing::debug!("trigger scheduler already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(target, self.poll_interval, cancel.clone()));
        *handle = Some(LoopHandle { cancel, task });
        tracing::info!(poll_interval_secs = self.poll_interval.as_secs(), "trigger scheduler started");
        true
    }

    /// Stop the loop and wait for it to exit. Returns `false` if it was not
    /// running.
    pub async fn stop(&self) -> bool {
        let Some(LoopHandle { cancel, task }) = self.handle.lock().await.take() else {
            return false;
        };
        cancel.cancel();
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "trigger scheduler task ended abnormally");
        }
        tracing::info!("trigger scheduler stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }
}

impl fmt::Debug for TriggerScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerScheduler")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

async fn run_loop<T: TriggerTarget>(target: Weak<T>, interval: Duration, cancel: CancellationToken) {
    let window = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::seconds(60));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(target) = target.upgrade() else {
                    tracing::debug!("trigger target dropped; scheduler exiting");
                    break;
                };
                poll_once(&*target, Utc::now(), window);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex as StdMutex};

    fn candidate(trigger: TriggerSpec) -> TriggerCandidate {
        TriggerCandidate {
            job_id: Uuid::now_v7(),
            job_name: "job".into(),
            trigger,
            enabled: true,
            running: false,
            last_execution_at: None,
            last_scheduled_at: None,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, h, m, s).unwrap()
    }

    fn cron(expression: &str) -> TriggerSpec {
        TriggerSpec::Cron {
            expression: expression.into(),
        }
    }

    fn window() -> chrono::Duration {
        chrono::Duration::seconds(60)
    }

    #[test]
    fn cron_due_within_poll_window_without_history() {
        let c = candidate(cron("0 * * * *"));
        assert_eq!(
            evaluate(&c, at(10, 0, 30), window()),
            Some(FireReason::Cron { occurrence: at(10, 0, 0) })
        );
        assert_eq!(evaluate(&c, at(10, 5, 0), window()), None);
    }

    #[test]
    fn cron_uses_last_scheduled_start_as_window_start() {
        let mut c = candidate(cron("0 * * * *"));
        c.last_scheduled_at = Some(at(10, 0, 1));
        assert_eq!(evaluate(&c, at(10, 59, 59), window()), None);
        assert!(evaluate(&c, at(11, 0, 0), window()).is_some());
    }

    #[test]
    fn interval_due_after_elapsed_seconds() {
        let mut c = candidate(TriggerSpec::Interval { seconds: 300 });
        assert_eq!(
            evaluate(&c, at(10, 0, 0), window()),
            Some(FireReason::Interval { elapsed_secs: None })
        );
        c.last_execution_at = Some(at(10, 0, 0));
        assert_eq!(evaluate(&c, at(10, 4, 59), window()), None);
        assert_eq!(
            evaluate(&c, at(10, 5, 0), window()),
            Some(FireReason::Interval { elapsed_secs: Some(300) })
        );
    }

    #[test]
    fn huge_interval_does_not_come_due() {
        let mut c = candidate(TriggerSpec::Interval { seconds: u64::MAX });
        c.last_execution_at = Some(at(9, 0, 0));
        assert_eq!(evaluate(&c, at(10, 0, 0), window()), None);

        c.trigger = TriggerSpec::Interval {
            seconds: i64::MAX as u64 + 1,
        };
        assert_eq!(evaluate(&c, at(10, 0, 0), window()), None);

        c.last_execution_at = None;
        assert!(evaluate(&c, at(10, 0, 0), window()).is_some());
    }

    #[test]
    fn running_disabled_and_manual_jobs_never_fire() {
        let mut running = candidate(TriggerSpec::Interval { seconds: 1 });
        running.running = true;
        assert_eq!(evaluate(&running, at(10, 0, 0), window()), None);

        let mut disabled = candidate(TriggerSpec::Interval { seconds: 1 });
        disabled.enabled = false;
        assert_eq!(evaluate(&disabled, at(10, 0, 0), window()), None);

        assert_eq!(evaluate(&candidate(TriggerSpec::Manual), at(10, 0, 0), window()), None);
        assert_eq!(evaluate(&candidate(cron("whenever")), at(10, 0, 0), window()), None);
    }

    #[derive(Default)]
    struct FakeTarget {
        jobs: StdMutex<Vec<TriggerCandidate>>,
        fired: StdMutex<Vec<Uuid>>,
    }

    impl TriggerTarget for FakeTarget {
        fn candidates(&self) -> Vec<TriggerCandidate> {
            self.jobs.lock().unwrap().clone()
        }

        fn fire(&self, job_id: Uuid, _reason: &FireReason) -> Option<Uuid> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.iter_mut().find(|j| j.job_id == job_id)?;
            job.running = true;
            self.fired.lock().unwrap().push(job_id);
            Some(Uuid::now_v7())
        }
    }

    #[test]
    fn poll_once_fires_only_due_jobs() {
        let due = candidate(TriggerSpec::Interval { seconds: 60 });
        let manual = candidate(TriggerSpec::Manual);
        let target = FakeTarget {
            jobs: StdMutex::new(vec![due.clone(), manual]),
            ..FakeTarget::default()
        };

        let fired = poll_once(&target, at(9, 0, 0), window());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, due.job_id);

        // Second pass: the job is now running and must not be re-fired.
        assert!(poll_once(&target, at(9, 5, 0), window()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_halts_polling() {
        let target = Arc::new(FakeTarget {
            jobs: StdMutex::new(vec![candidate(TriggerSpec::Interval { seconds: 3600 })]),
            ..FakeTarget::default()
        });
        let scheduler = TriggerScheduler::new(Duration::from_secs(60));

        assert!(scheduler.start(Arc::downgrade(&target)).await);
        assert!(!scheduler.start(Arc::downgrade(&target)).await);
        assert!(scheduler.is_running().await);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(target.fired.lock().unwrap().len(), 1);

        assert!(scheduler.stop().await);
        assert!(!scheduler.stop().await);
        assert!(!scheduler.is_running().await);

        target.jobs.lock().unwrap()[0].running = false;
        target.jobs.lock().unwrap()[0].last_execution_at = None;
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(target.fired.lock().unwrap().len(), 1);
    }
}
