//! Execution coordinator: phase-by-phase, batch-by-batch domain execution.
//!
//! The `Coordinator` drives one attempt of an `ExecutionPlan`:
//!
//! 1. Compute dependency batches over every workload in the plan.
//! 2. Split the plan's domains into strategy phases (see [`strategy`]).
//! 3. Inside each phase, walk the dependency batches in order, running the
//!    phase's workloads of that batch with one concurrent task per domain
//!    via `tokio::JoinSet`.
//! 4. Wait for every task of a step before the next batch or phase starts.
//! 5. Merge the per-step results of each domain into one `DomainResult`.
//!
//! A phase is fully terminal before the next one starts, whatever the
//! batch layout. A dependency on a workload of a later phase cannot be
//! honoured; it is logged, or rejected under [`BatchMode::Strict`].
//!
//! A failing, panicking or missing executor only affects its own domain.

pub mod strategy;

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use assayer_types::config::BatchMode;
use assayer_types::error::ConfigurationError;
use assayer_types::event::OrchestratorEvent;
use assayer_types::plan::{Domain, DomainPlan, ExecutionPlan};
use assayer_types::result::{DomainResult, DomainStatus};
use futures_util::FutureExt;
use tokio::task::JoinSet;

use crate::event::EventBus;
use crate::executor::{BoxDomainExecutor, ExecutionContext, ExecutorRegistry};
use crate::schedule::batch::{BatchPlan, DependencyGraphError, build_batches, nodes_from_plan};

pub use strategy::{Phase, PhaseConflict, PhaseOrderError, phase_conflicts, plan_phases};

/// Errors that prevent a plan from running at all.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] ConfigurationError),

    #[error(transparent)]
    DependencyGraph(#[from] DependencyGraphError),

    #[error(transparent)]
    PhaseOrder(#[from] PhaseOrderError),
}

/// Outcome of one coordinated pass over a plan.
#[derive(Debug, Clone)]
pub struct CoordinatedRun {
    pub batches: BatchPlan,
    /// One merged result per domain present in the plan, in domain order.
    pub domain_results: Vec<DomainResult>,
    pub cancelled: bool,
}

impl CoordinatedRun {
    /// True when every domain passed or was skipped.
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.domain_results.iter().all(|r| r.status.is_success())
    }

    /// Short description of the failing domains, for error messages.
    pub fn failure_summary(&self) -> String {
        let failing: Vec<String> = self
            .domain_results
            .iter()
            .filter(|r| !r.status.is_success())
            .map(|r| match &r.error {
                Some(e) if !e.is_empty() => format!("{} {} ({e})", r.domain, r.status),
                _ => format!("{} {}", r.domain, r.status),
            })
            .collect();
        if failing.is_empty() {
            "no failing domains".to_string()
        } else {
            failing.join("; ")
        }
    }
}

/// Drives domain executors over a plan.
#[derive(Debug, Clone)]
pub struct Coordinator {
    executors: ExecutorRegistry,
    event_bus: EventBus,
    batch_mode: BatchMode,
}

impl Coordinator {
    pub fn new(executors: ExecutorRegistry, event_bus: EventBus) -> Self {
        Self {
            executors,
            event_bus,
            batch_mode: BatchMode::default(),
        }
    }

    pub fn with_batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    /// Compute the dependency batches of `plan` without running anything.
    ///
    /// Also checks the dependencies against the strategy's phase order.
    pub fn batches(&self, plan: &ExecutionPlan) -> Result<BatchPlan, CoordinatorError> {
        plan.validate()?;
        let batches = build_batches(&nodes_from_plan(plan), self.batch_mode)?;

        let conflicts = phase_conflicts(plan);
        if !conflicts.is_empty() {
            let error = PhaseOrderError {
                strategy: plan.strategy,
                conflicts,
            };
            if self.batch_mode == BatchMode::Strict {
                return Err(error.into());
            }
            tracing::warn!(error = %error, "dependencies point to a later phase; they will run after their dependents");
        }
        Ok(batches)
    }

    /// Run `plan` once. Cancellation is read from `ctx.cancel`.
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
    ) -> Result<CoordinatedRun, CoordinatorError> {
        let batches = self.batches(plan)?;
        // Workload name -> (batch index, position inside the batch).
        let slots: HashMap<&str, (usize, usize)> = batches
            .batches
            .iter()
            .flat_map(|b| {
                b.workloads
                    .iter()
                    .enumerate()
                    .map(move |(pos, w)| (w.as_str(), (b.index, pos)))
            })
            .collect();
        let domains: BTreeMap<Domain, DomainPlan> = plan
            .domain_plans()
            .map(|(d, p)| (d, p.clone()))
            .collect();

        let mut merged: BTreeMap<Domain, DomainResult> = BTreeMap::new();
        let mut cancelled = false;

        'phases: for phase in plan_phases(plan.strategy, &domains) {
            for batch in &batches.batches {
                let members: Vec<(Domain, DomainPlan)> = phase
                    .members
                    .iter()
                    .filter_map(|(domain, sub_plan)| {
                        let mut part = sub_plan.filtered(|w| {
                            slots.get(w.name.as_str()).map(|s| s.0) == Some(batch.index)
                        });
                        part.workloads
                            .sort_by_key(|w| slots.get(w.name.as_str()).map_or(usize::MAX, |s| s.1));
                        (!part.is_empty()).then_some((*domain, part))
                    })
                    .collect();
                if members.is_empty() {
                    continue;
                }
                if ctx.cancel.is_cancelled() {
                    cancelled = true;
                    break 'phases;
                }

                let workloads: Vec<String> = members
                    .iter()
                    .flat_map(|(_, p)| p.workloads.iter().map(|w| w.name.clone()))
                    .collect();
                tracing::debug!(
                    run_id = %ctx.run_id,
                    phase = phase.label,
                    batch = batch.index,
                    workloads = workloads.len(),
                    "starting batch"
                );
                self.event_bus.publish(OrchestratorEvent::BatchStarted {
                    run_id: ctx.run_id,
                    index: batch.index,
                    phase: phase.label.to_string(),
                    workloads,
                });

                let step = Phase {
                    label: phase.label,
                    members,
                };
                for result in self.run_phase(batch.index, step, ctx).await {
                    match merged.get_mut(&result.domain) {
                        Some(existing) => existing.merge(result),
                        None => {
                            merged.insert(result.domain, result);
                        }
                    }
                }
            }
        }

        if ctx.cancel.is_cancelled() {
            cancelled = true;
        }
        if cancelled {
            for (domain, _) in plan.domain_plans() {
                merged
                    .entry(domain)
                    .or_insert_with(|| DomainResult::cancelled(domain));
            }
        }

        Ok(CoordinatedRun {
            batches,
            domain_results: merged.into_values().collect(),
            cancelled,
        })
    }

    async fn run_phase(&self, batch: usize, phase: Phase, ctx: &ExecutionContext) -> Vec<DomainResult> {
        let mut join_set = JoinSet::new();

        for (domain, sub_plan) in phase.members {
            let mut task_ctx = ctx.clone();
            task_ctx.batch = batch;
            task_ctx.phase = phase.label.to_string();
            task_ctx.cancel = ctx.cancel.child_token();

            self.event_bus.publish(OrchestratorEvent::DomainStarted {
                run_id: ctx.run_id,
                domain,
                batch,
                phase: phase.label.to_string(),
                workloads: sub_plan.workloads.len(),
            });
            tracing::info!(run_id = %ctx.run_id, %domain, batch, phase = phase.label, "domain started");

            let executor = self.executors.get(domain);
            join_set.spawn(run_domain(domain, executor, sub_plan, task_ctx));
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    tracing::info!(
                        run_id = %ctx.run_id,
                        domain = %result.domain,
                        status = %result.status,
                        score = result.score,
                        "domain completed"
                    );
                    self.event_bus.publish(OrchestratorEvent::DomainCompleted {
                        run_id: ctx.run_id,
                        domain: result.domain,
                        batch,
                        phase: phase.label.to_string(),
                        status: result.status,
                        score: result.score,
                        duration_ms: result.duration_ms,
                    });
                    results.push(result);
                }
                Err(e) => {
                    tracing::error!(run_id = %ctx.run_id, error = %e, "domain task aborted");
                }
            }
        }
        results.sort_by_key(|r| r.domain);
        results
    }
}

async fn run_domain(
    domain: Domain,
    executor: Option<Arc<BoxDomainExecutor>>,
    plan: DomainPlan,
    ctx: ExecutionContext,
) -> DomainResult {
    let Some(executor) = executor else {
        tracing::warn!(%domain, "no executor registered for domain");
        return DomainResult::error(domain, format!("no executor registered for {domain}"));
    };

    let started = Instant::now();
    let outcome = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Ok(DomainResult::cancelled(domain)),
        outcome = AssertUnwindSafe(executor.execute(&plan, &ctx)).catch_unwind() => outcome,
    };

    let mut result = match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(%domain, panic = %message, "domain executor panicked");
            DomainResult::error(domain, format!("executor panicked: {message}"))
        }
    };

    if result.domain != domain {
        tracing::warn!(expected = %domain, reported = %result.domain, "executor reported wrong domain");
        result.domain = domain;
    }
    if !result.score.is_finite() {
        result.score = 0.0;
    }
    result.score = result.score.clamp(0.0, 1.0);
    if result.duration_ms == 0 && result.status != DomainStatus::Cancelled {
        result.duration_ms = started.elapsed().as_millis() as u64;
    }
    result
}
