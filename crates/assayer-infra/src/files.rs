//! Plan and job spec files.
//!
//! Files ending in `.json` are parsed as JSON, everything else as TOML.

use std::path::{Path, PathBuf};

use assayer_types::job::JobSpec;
use assayer_types::plan::ExecutionPlan;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Parse `content` as JSON or TOML depending on `path`.
pub fn parse_document<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T, FileError> {
    let parsed = if is_json(path) {
        serde_json::from_str(content).map_err(|e| e.to_string())
    } else {
        toml::from_str(content).map_err(|e| e.to_string())
    };
    parsed.map_err(|reason| FileError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

async fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, FileError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| FileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_document(path, &content)
}

pub async fn load_plan(path: &Path) -> Result<ExecutionPlan, FileError> {
    load_document(path).await
}

pub async fn load_job_spec(path: &Path) -> Result<JobSpec, FileError> {
    load_document(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use assayer_types::job::TriggerSpec;
    use assayer_types::plan::{Domain, ExecutionStrategy, PhaseHint};
    use tempfile::TempDir;

    #[tokio::test]
    async fn toml_plan_file_is_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plan.toml");
        tokio::fs::write(
            &path,
            r#"
strategy = "integrated"

[[functional.workloads]]
name = "smoke"
phase = "smoke"
command = "npm"
args = ["test", "--", "smoke"]

[[security.workloads]]
name = "zap"
depends_on = ["smoke"]
"#,
        )
        .await
        .unwrap();

        let plan = load_plan(&path).await.unwrap();
        assert_eq!(plan.strategy, ExecutionStrategy::Integrated);
        let functional = plan.domain_plan(Domain::Functional).unwrap();
        assert_eq!(functional.workloads[0].phase, PhaseHint::Smoke);
        assert_eq!(functional.workloads[0].args.len(), 3);
        assert_eq!(plan.domain_plan(Domain::Security).unwrap().workloads[0].depends_on, vec!["smoke"]);
    }

    #[tokio::test]
    async fn json_job_spec_is_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("job.JSON");
        tokio::fs::write(
            &path,
            r#"{
                "name": "nightly",
                "trigger": {"type": "cron", "expression": "every day at 02:00"},
                "max_retries": 1,
                "plan": {"compliance": {"workloads": [{"name": "gdpr"}]}}
            }"#,
        )
        .await
        .unwrap();

        let spec = load_job_spec(&path).await.unwrap();
        assert_eq!(spec.name, "nightly");
        assert_eq!(spec.max_retries, Some(1));
        assert!(matches!(spec.trigger, TriggerSpec::Cron { .. }));
    }

    #[tokio::test]
    async fn missing_and_malformed_files_are_errors() {
        let tmp = TempDir::new().unwrap();
        let missing = load_plan(&tmp.path().join("absent.toml")).await.unwrap_err();
        assert!(matches!(missing, FileError::Io { .. }));

        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, "strategy = [").await.unwrap();
        let bad = load_plan(&path).await.unwrap_err();
        assert!(matches!(bad, FileError::Parse { .. }));
    }
}
