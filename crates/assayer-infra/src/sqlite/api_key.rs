//! API keys guarding the REST surface.
//!
//! Keys are random 32-byte values shown once when issued. Only their SHA-256
//! hashes are stored in the `api_keys` table.

use chrono::Utc;
use rand::{RngCore, rng};
use sha2::{Digest, Sha256};

use super::pool::DatabasePool;

/// Prefix of every issued key.
pub const KEY_PREFIX: &str = "assay_";

/// SQLite-backed API key store.
#[derive(Clone)]
pub struct SqliteApiKeyStore {
    pool: DatabasePool,
}

impl SqliteApiKeyStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Issue a key if none exists yet. Returns the plaintext of a newly
    /// issued key, or `None` when one was already on file.
    pub async fn ensure_key(&self) -> Result<Option<String>, sqlx::Error> {
        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM api_keys LIMIT 1")
            .fetch_optional(&self.pool.reader)
            .await?;
        if existing.is_some() {
            return Ok(None);
        }

        let key = generate_api_key();
        self.insert(&key, "default").await?;
        tracing::info!("issued REST API key");
        Ok(Some(key))
    }

    /// Revoke every key and issue a fresh one.
    pub async fn rotate(&self) -> Result<String, sqlx::Error> {
        let key = generate_api_key();
        let mut tx = self.pool.writer.begin().await?;
        sqlx::query("DELETE FROM api_keys").execute(&mut *tx).await?;
        sqlx::query("INSERT INTO api_keys (id, key_hash, name, created_at) VALUES (?, ?, 'default', ?)")
            .bind(uuid::Uuid::now_v7().to_string())
            .bind(hash_api_key(&key))
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!("rotated REST API key");
        Ok(key)
    }

    /// Whether `key` matches a stored key. Stamps `last_used_at` on a match.
    pub async fn verify(&self, key: &str) -> Result<bool, sqlx::Error> {
        let key_hash = hash_api_key(key);
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM api_keys WHERE key_hash = ?")
            .bind(&key_hash)
            .fetch_optional(&self.pool.reader)
            .await?;

        let Some((id,)) = row else {
            return Ok(false);
        };
        if let Err(e) = sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(&id)
            .execute(&self.pool.writer)
            .await
        {
            tracing::debug!(error = %e, "failed to stamp api key usage");
        }
        Ok(true)
    }

    async fn insert(&self, key: &str, name: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO api_keys (id, key_hash, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(uuid::Uuid::now_v7().to_string())
            .bind(hash_api_key(key))
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool.writer)
            .await?;
        Ok(())
    }
}

/// A fresh random key: [`KEY_PREFIX`] followed by 64 hex characters.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{KEY_PREFIX}{hex}")
}

/// SHA-256 of `key`, lowercase hex.
pub fn hash_api_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}
