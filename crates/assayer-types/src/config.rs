//! Orchestrator configuration types.
//!
//! `OrchestratorConfig` represents `config.toml` in the data directory. Every
//! field has a default, so an empty or missing file is valid.

use serde::{Deserialize, Serialize};

use crate::job::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
use crate::result::ScoringWeights;

/// What the batch scheduler does with cyclic or dangling dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Put all unresolvable workloads in one final batch and warn.
    #[default]
    Forced,
    /// Reject the plan.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Top-level configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Trigger scheduler poll interval.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Base retry delay; attempt `n` waits `base * n`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Cap on the retry delay.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Executions kept when state is loaded; older ones are pruned.
    #[serde(default = "default_max_executions_retained")]
    pub max_executions_retained: usize,

    /// Upper bound on one notification delivery.
    #[serde(default = "default_notification_timeout_secs")]
    pub notification_timeout_secs: u64,

    /// Capacity of the broadcast event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub batch_mode: BatchMode,

    #[serde(default)]
    pub weights: ScoringWeights,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Export spans to stdout through OpenTelemetry.
    #[serde(default)]
    pub otel: bool,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_executions_retained() -> usize {
    1_000
}

fn default_notification_timeout_secs() -> u64 {
    30
}

fn default_event_capacity() -> usize {
    1_024
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            default_timeout_secs: default_timeout_secs(),
            default_max_retries: default_max_retries(),
            max_executions_retained: default_max_executions_retained(),
            notification_timeout_secs: default_notification_timeout_secs(),
            event_capacity: default_event_capacity(),
            batch_mode: BatchMode::default(),
            weights: ScoringWeights::default(),
            log_format: LogFormat::default(),
            otel: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.retry_base_delay_ms, 1_000);
        assert_eq!(config.retry_max_delay_ms, 30_000);
        assert_eq!(config.max_executions_retained, 1_000);
        assert_eq!(config.notification_timeout_secs, 30);
        assert_eq!(config.batch_mode, BatchMode::Forced);
        assert_eq!(config.weights, ScoringWeights::default());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config.default_timeout_secs, 1800);
        assert_eq!(config.default_max_retries, 2);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(!config.otel);
    }

    #[test]
    fn test_config_deserialize_with_values() {
        let toml_str = r#"
poll_interval_secs = 15
batch_mode = "strict"
log_format = "json"

[weights]
functional = 0.5
security = 0.5
"#;
        let config: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.batch_mode, BatchMode::Strict);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.weights.functional, 0.5);
        assert_eq!(config.weights.compliance, 0.3);
    }
}
