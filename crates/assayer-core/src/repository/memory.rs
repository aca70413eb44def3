//! In-process repository used by tests and ephemeral runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use assayer_types::error::RepositoryError;
use assayer_types::execution::Execution;
use assayer_types::job::Job;
use tokio::sync::RwLock;

use super::OrchestratorRepository;

#[derive(Debug, Default)]
struct Inner {
    jobs: RwLock<Vec<Job>>,
    executions: RwLock<Vec<Execution>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

/// Keeps both collections in memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    inner: Arc<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository pre-populated with the given collections.
    pub fn with_state(jobs: Vec<Job>, executions: Vec<Execution>) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(jobs),
                executions: RwLock::new(executions),
                ..Inner::default()
            }),
        }
    }

    /// Make every subsequent save fail with a query error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves across both collections.
    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::SeqCst)
    }

    pub async fn stored_jobs(&self) -> Vec<Job> {
        self.inner.jobs.read().await.clone()
    }

    pub async fn stored_executions(&self) -> Vec<Execution> {
        self.inner.executions.read().await.clone()
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.inner.fail_saves.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl OrchestratorRepository for InMemoryRepository {
    async fn load_jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        Ok(self.inner.jobs.read().await.clone())
    }

    async fn save_jobs(&self, jobs: &[Job]) -> Result<(), RepositoryError> {
        self.check_writable()?;
        *self.inner.jobs.write().await = jobs.to_vec();
        self.inner.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_executions(&self) -> Result<Vec<Execution>, RepositoryError> {
        Ok(self.inner.executions.read().await.clone())
    }

    async fn save_executions(&self, executions: &[Execution]) -> Result<(), RepositoryError> {
        self.check_writable()?;
        *self.inner.executions.write().await = executions.to_vec();
        self.inner.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
