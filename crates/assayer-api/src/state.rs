//! Application state wiring the orchestrator to its infrastructure.
//!
//! AppState holds the concrete orchestrator used by both CLI and REST API.
//! The orchestrator is generic over its repository; AppState pins it to the
//! SQLite implementation.

use std::path::PathBuf;

use assayer_core::Orchestrator;
use assayer_core::executor::ExecutorRegistry;
use assayer_core::notify::BoxNotifier;
use assayer_infra::executor::ProcessDomainExecutor;
use assayer_infra::notify::LogNotifier;
use assayer_infra::sqlite::api_key::SqliteApiKeyStore;
use assayer_infra::sqlite::orchestrator::SqliteOrchestratorRepository;
use assayer_infra::sqlite::pool::{DatabasePool, database_url};
use assayer_types::config::OrchestratorConfig;
use assayer_types::plan::Domain;

/// Orchestrator pinned to the SQLite repository.
pub type ConcreteOrchestrator = Orchestrator<SqliteOrchestratorRepository>;

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ConcreteOrchestrator,
    pub api_keys: SqliteApiKeyStore,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Connect to the database in `data_dir` and load the orchestrator.
    pub async fn init(data_dir: PathBuf, config: OrchestratorConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let api_keys = SqliteApiKeyStore::new(db_pool.clone());
        let repo = SqliteOrchestratorRepository::new(db_pool);

        let mut executors = ExecutorRegistry::new();
        for domain in Domain::ALL {
            executors.register(ProcessDomainExecutor::new(domain));
        }

        let orchestrator =
            Orchestrator::load(config, repo, executors, BoxNotifier::new(LogNotifier)).await?;

        Ok(Self {
            orchestrator,
            api_keys,
            data_dir,
        })
    }
}
