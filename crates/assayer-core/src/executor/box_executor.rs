//! BoxDomainExecutor -- object-safe dynamic dispatch wrapper for DomainExecutor.
//!
//! 1. Define an object-safe `DomainExecutorDyn` trait with boxed futures
//! 2. Blanket-impl `DomainExecutorDyn` for all `T: DomainExecutor`
//! 3. `BoxDomainExecutor` wraps `Box<dyn DomainExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use assayer_types::plan::{Domain, DomainPlan};
use assayer_types::result::DomainResult;

use super::{DomainExecutor, ExecutionContext};

/// Object-safe version of [`DomainExecutor`] with boxed futures.
pub trait DomainExecutorDyn: Send + Sync {
    fn domain(&self) -> Domain;

    fn execute_boxed<'a>(
        &'a self,
        plan: &'a DomainPlan,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = DomainResult> + Send + 'a>>;
}

impl<T: DomainExecutor> DomainExecutorDyn for T {
    fn domain(&self) -> Domain {
        DomainExecutor::domain(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        plan: &'a DomainPlan,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = DomainResult> + Send + 'a>> {
        Box::pin(self.execute(plan, ctx))
    }
}

/// Type-erased domain executor, so one registry can hold different
/// executor types per domain.
pub struct BoxDomainExecutor {
    inner: Box<dyn DomainExecutorDyn>,
}

impl BoxDomainExecutor {
    pub fn new<T: DomainExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn domain(&self) -> Domain {
        self.inner.domain()
    }

    pub async fn execute(&self, plan: &DomainPlan, ctx: &ExecutionContext) -> DomainResult {
        self.inner.execute_boxed(plan, ctx).await
    }
}

impl std::fmt::Debug for BoxDomainExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDomainExecutor")
            .field("domain", &self.domain())
            .finish()
    }
}
