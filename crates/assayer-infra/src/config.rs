//! Configuration loader for Assayer.
//!
//! Reads `config.toml` from the data directory (`~/.assayer/` by default)
//! and deserializes it into [`OrchestratorConfig`]. Falls back to defaults
//! when the file is missing or malformed.

use std::path::{Path, PathBuf};

use assayer_types::config::OrchestratorConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "ASSAYER_DATA_DIR";

/// Resolve the data directory: `ASSAYER_DATA_DIR`, else `~/.assayer`.
pub fn resolve_data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".assayer"),
    }
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`OrchestratorConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> OrchestratorConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return OrchestratorConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return OrchestratorConfig::default();
        }
    };

    match toml::from_str::<OrchestratorConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            OrchestratorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assayer_types::config::{BatchMode, LogFormat};
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.max_executions_retained, 1000);
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
poll_interval_secs = 15
default_max_retries = 4
batch_mode = "strict"
log_format = "json"

[weights]
functional = 0.5
security = 0.25
compliance = 0.25
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.default_max_retries, 4);
        assert_eq!(config.batch_mode, BatchMode::Strict);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.weights.functional, 0.5);
        assert_eq!(config.retry_base_delay_ms, 1000);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.poll_interval_secs, 60);
    }
}
