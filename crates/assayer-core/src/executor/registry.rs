use std::collections::HashMap;
use std::sync::Arc;

use assayer_types::plan::Domain;

use super::{BoxDomainExecutor, DomainExecutor};

/// Domain -> executor lookup used by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Domain, Arc<BoxDomainExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` under its own domain, replacing any previous one.
    pub fn register<T: DomainExecutor + 'static>(&mut self, executor: T) -> &mut Self {
        let boxed = BoxDomainExecutor::new(executor);
        self.executors.insert(boxed.domain(), Arc::new(boxed));
        self
    }

    pub fn with<T: DomainExecutor + 'static>(mut self, executor: T) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, domain: Domain) -> Option<Arc<BoxDomainExecutor>> {
        self.executors.get(&domain).cloned()
    }

    pub fn contains(&self, domain: Domain) -> bool {
        self.executors.contains_key(&domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionContext, FnExecutor};
    use assayer_types::plan::{DomainPlan, Workload};
    use assayer_types::result::DomainResult;
    use uuid::Uuid;

    #[tokio::test]
    async fn registered_executor_is_dispatched_by_domain() {
        let registry = ExecutorRegistry::new().with(FnExecutor::new(
            Domain::Security,
            |plan: DomainPlan, _ctx: ExecutionContext| async move {
                DomainResult::from_counts(Domain::Security, plan.workloads.len() as u32, 0)
            },
        ));

        assert!(registry.contains(Domain::Security));
        assert!(registry.get(Domain::Functional).is_none());

        let executor = registry.get(Domain::Security).unwrap();
        let plan = DomainPlan::new(vec![Workload::new("a"), Workload::new("b")]);
        let result = executor
            .execute(&plan, &ExecutionContext::new(Uuid::now_v7()))
            .await;
        assert_eq!(result.passed, 2);
        assert_eq!(result.domain, Domain::Security);
    }
}
