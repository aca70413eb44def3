//! SQLite orchestrator repository implementation.
//!
//! Implements `OrchestratorRepository` from `assayer-core`. Jobs and
//! executions are stored as JSON records with a `position` column holding
//! their collection order. A save deletes and rewrites the whole collection
//! in one transaction on the writer pool.

use assayer_core::repository::OrchestratorRepository;
use assayer_types::error::RepositoryError;
use assayer_types::execution::Execution;
use assayer_types::job::Job;
use chrono::Utc;
use serde::de::DeserializeOwned;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `OrchestratorRepository`.
pub struct SqliteOrchestratorRepository {
    pool: DatabasePool,
}

impl SqliteOrchestratorRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Decode a stored record. Undecodable records are corruption, not query
/// errors: the orchestrator refuses to start on them.
fn decode_record<T: DeserializeOwned>(id: &str, record: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(record).map_err(|e| RepositoryError::Corrupted {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn encode_record<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize record: {e}")))
}

async fn load_records<T: DeserializeOwned>(
    pool: &DatabasePool,
    sql: &str,
) -> Result<Vec<T>, RepositoryError> {
    let rows = sqlx::query(sql)
        .fetch_all(&pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    rows.iter()
        .map(|row| {
            let id: String = row
                .try_get("id")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let record: String = row
                .try_get("record")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            decode_record(&id, &record)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// OrchestratorRepository impl
// ---------------------------------------------------------------------------

impl OrchestratorRepository for SqliteOrchestratorRepository {
    async fn load_jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        load_records(&self.pool, "SELECT id, record FROM jobs ORDER BY position").await
    }

    async fn save_jobs(&self, jobs: &[Job]) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query("DELETE FROM jobs")
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        for (position, job) in jobs.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO jobs (id, position, name, record, updated_at)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(job.id.to_string())
            .bind(position as i64)
            .bind(&job.name)
            .bind(encode_record(job)?)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn load_executions(&self) -> Result<Vec<Execution>, RepositoryError> {
        load_records(&self.pool, "SELECT id, record FROM executions ORDER BY position").await
    }

    async fn save_executions(&self, executions: &[Execution]) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query("DELETE FROM executions")
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        for (position, execution) in executions.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO executions (id, position, job_id, status, record, created_at)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(execution.id.to_string())
            .bind(position as i64)
            .bind(execution.job_id.to_string())
            .bind(execution.status.to_string())
            .bind(encode_record(execution)?)
            .bind(execution.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }
}
