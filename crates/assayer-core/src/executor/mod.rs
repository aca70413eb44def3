//! Domain executor port.
//!
//! A `DomainExecutor` runs the workloads of one domain (functional, security,
//! or compliance) and reports a `DomainResult`. Executors never return
//! errors: internal failures are reported as `error`/`failed` results so the
//! coordinator can carry on with sibling domains.

pub mod box_executor;
pub mod registry;

use std::future::Future;

use assayer_types::plan::{Domain, DomainPlan};
use assayer_types::result::DomainResult;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use box_executor::BoxDomainExecutor;
pub use registry::ExecutorRegistry;

/// Values passed to every executor invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Execution id for job runs, a fresh id for one-shot plan runs.
    pub run_id: Uuid,
    pub job_id: Option<Uuid>,
    /// 1-based attempt number.
    pub attempt: u32,
    /// 0-based dependency batch index.
    pub batch: usize,
    /// Strategy phase label (e.g. "functional", "baseline", "all").
    pub phase: String,
    /// The plan's free-form context map.
    pub values: serde_json::Map<String, serde_json::Value>,
    /// Cancelled when the execution is cancelled. Executors holding external
    /// resources (child processes) should watch it.
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            job_id: None,
            attempt: 1,
            batch: 0,
            phase: String::new(),
            values: serde_json::Map::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Runs one domain's workloads.
///
/// Uses RPITIT (native async fn in traits, Rust 2024). Use
/// [`BoxDomainExecutor`] for dynamic dispatch.
pub trait DomainExecutor: Send + Sync {
    /// The domain this executor handles.
    fn domain(&self) -> Domain;

    /// Run `plan` and report the outcome.
    fn execute(
        &self,
        plan: &DomainPlan,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = DomainResult> + Send;
}

/// Adapter turning a closure into a [`DomainExecutor`].
///
/// The closure receives owned copies of the plan and context.
pub struct FnExecutor<F> {
    domain: Domain,
    run: F,
}

impl<F> FnExecutor<F> {
    pub fn new(domain: Domain, run: F) -> Self {
        Self { domain, run }
    }
}

impl<F, Fut> DomainExecutor for FnExecutor<F>
where
    F: Fn(DomainPlan, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = DomainResult> + Send,
{
    fn domain(&self) -> Domain {
        self.domain
    }

    fn execute(
        &self,
        plan: &DomainPlan,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = DomainResult> + Send {
        (self.run)(plan.clone(), ctx.clone())
    }
}
