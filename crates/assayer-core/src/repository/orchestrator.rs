//! Orchestrator repository trait definition.
//!
//! Jobs and executions are persisted as two flat, ordered collections. The
//! orchestrator loads both once at startup and writes a whole collection back
//! after every change. The infrastructure layer (assayer-infra) implements
//! this trait with SQLite persistence.

use assayer_types::error::RepositoryError;
use assayer_types::execution::Execution;
use assayer_types::job::Job;

/// Whole-collection storage for jobs and executions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait OrchestratorRepository: Send + Sync {
    /// Load every job in stored order.
    fn load_jobs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Job>, RepositoryError>> + Send;

    /// Replace the stored job collection.
    fn save_jobs(
        &self,
        jobs: &[Job],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load every execution in stored order (oldest first).
    fn load_executions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// Replace the stored execution collection.
    fn save_executions(
        &self,
        executions: &[Execution],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
