//! Retry and timeout supervision for execution attempts.
//!
//! The supervisor runs an attempt under a hard timeout, retries failed or
//! timed-out attempts with linear back-off capped at `max_delay`, and watches
//! a cancellation token both while an attempt runs and while it sleeps
//! between attempts. It owns no execution state: callers observe progress
//! through [`SupervisorEvent`]s.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use assayer_types::config::OrchestratorConfig;
use assayer_types::job::Job;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Timeout and retry budget for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn for_job(job: &Job, config: &OrchestratorConfig) -> Self {
        Self {
            max_retries: job.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            timeout: Duration::from_secs(job.timeout_secs),
        }
    }

    /// Whether another attempt follows failed attempt `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before the attempt following `attempt`: `min(base * attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Errors / events / outcome
// ---------------------------------------------------------------------------

/// Why an attempt did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError<E> {
    #[error("attempt timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("{0}")]
    Failed(E),

    #[error("cancelled")]
    Cancelled,
}

/// Progress notifications emitted while supervising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    AttemptStarted {
        attempt: u32,
    },
    AttemptFailed {
        attempt: u32,
        error: String,
        will_retry: bool,
    },
    RetryScheduled {
        next_attempt: u32,
        delay: Duration,
    },
}

/// Final outcome of a supervised run.
#[derive(Debug)]
pub struct SupervisedOutcome<T, E> {
    pub result: Result<T, AttemptError<E>>,
    /// Attempts started (0 if cancelled before the first).
    pub attempts: u32,
}

impl<T, E> SupervisedOutcome<T, E> {
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Supervisor {
    policy: RetryPolicy,
}

impl Supervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt_fn` until it succeeds, the retry budget is spent, or
    /// `cancel` fires. `attempt_fn` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, H>(
        &self,
        cancel: &CancellationToken,
        mut attempt_fn: F,
        mut on_event: H,
    ) -> SupervisedOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        H: FnMut(SupervisorEvent),
    {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return SupervisedOutcome {
                    result: Err(AttemptError::Cancelled),
                    attempts: attempt - 1,
                };
            }

            on_event(SupervisorEvent::AttemptStarted { attempt });
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AttemptError::Cancelled),
                result = tokio::time::timeout(self.policy.timeout, attempt_fn(attempt)) => match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(AttemptError::Failed(e)),
                    Err(_) => Err(AttemptError::Timeout(self.policy.timeout)),
                },
            };

            let error = match outcome {
                Ok(value) => {
                    return SupervisedOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(AttemptError::Cancelled) => {
                    return SupervisedOutcome {
                        result: Err(AttemptError::Cancelled),
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };

            let will_retry = self.policy.should_retry(attempt);
            tracing::warn!(attempt, will_retry, error = %error, "attempt failed");
            on_event(SupervisorEvent::AttemptFailed {
                attempt,
                error: error.to_string(),
                will_retry,
            });
            if !will_retry {
                return SupervisedOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            let delay = self.policy.delay_for(attempt);
            on_event(SupervisorEvent::RetryScheduled {
                next_attempt: attempt + 1,
                delay,
            });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return SupervisedOutcome {
                        result: Err(AttemptError::Cancelled),
                        attempts: attempt,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
