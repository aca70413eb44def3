//! SQLite storage layer.
//!
//! Repository implementations and the API key store, backed by SQLite with
//! WAL mode and split read/write connection pools.

pub mod api_key;
pub mod orchestrator;
pub mod pool;

pub use api_key::SqliteApiKeyStore;
pub use orchestrator::SqliteOrchestratorRepository;
pub use pool::DatabasePool;
