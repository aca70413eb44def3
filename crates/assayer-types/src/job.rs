//! Job definition types.
//!
//! A `Job` is a named, persisted `ExecutionPlan` plus the policy used to run
//! it: trigger, timeout, retry budget and dependencies on other jobs. Jobs
//! are only constructed through `JobBuilder`, which rejects invalid values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::plan::{ExecutionPlan, Priority};

/// Default per-attempt timeout when neither the job nor the config sets one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// Default retry budget when neither the job nor the config sets one.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

const MAX_NAME_LEN: usize = 128;

/// What starts a job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Only started explicitly (CLI, API, or dependency batch).
    #[default]
    Manual,
    /// Started on a cron schedule. Accepts 5/6-field cron or human-readable
    /// forms such as "every 5 minutes".
    Cron { expression: String },
    /// Started once `seconds` have elapsed since the last execution.
    Interval { seconds: u64 },
}

/// A persisted, schedulable test job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Names of jobs that must run before this one in a batched trigger.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub trigger: TriggerSpec,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub plan: ExecutionPlan,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// JobSpec (external input)
// ---------------------------------------------------------------------------

/// User-supplied job definition (CLI file, HTTP body).
///
/// Unset numeric fields fall back to configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub trigger: TriggerSpec,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub plan: ExecutionPlan,
}

impl JobSpec {
    /// Turn the spec into a builder, filling unset fields from the given
    /// defaults.
    pub fn into_builder(self, default_timeout_secs: u64, default_max_retries: u32) -> JobBuilder {
        let mut builder = JobBuilder::new(self.name, self.plan)
            .trigger(self.trigger)
            .timeout_secs(self.timeout_secs.unwrap_or(default_timeout_secs))
            .max_retries(self.max_retries.unwrap_or(default_max_retries))
            .enabled(self.enabled.unwrap_or(true))
            .priority(self.priority);
        if let Some(description) = self.description {
            builder = builder.description(description);
        }
        for dependency in self.dependencies {
            builder = builder.dependency(dependency);
        }
        for tag in self.tags {
            builder = builder.tag(tag);
        }
        builder
    }
}

/// Partial update for an existing job. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub trigger: Option<TriggerSpec>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub plan: Option<ExecutionPlan>,
}

impl Job {
    /// Apply a partial update, re-validating through `JobBuilder`.
    ///
    /// Identity and `created_at` are preserved; `updated_at` is refreshed.
    pub fn apply_update(&self, update: JobUpdate) -> Result<Job, ConfigurationError> {
        let mut builder = JobBuilder::new(
            update.name.unwrap_or_else(|| self.name.clone()),
            update.plan.unwrap_or_else(|| self.plan.clone()),
        )
        .trigger(update.trigger.unwrap_or_else(|| self.trigger.clone()))
        .timeout_secs(update.timeout_secs.unwrap_or(self.timeout_secs))
        .max_retries(update.max_retries.unwrap_or(self.max_retries))
        .enabled(update.enabled.unwrap_or(self.enabled))
        .priority(update.priority.unwrap_or(self.priority));

        if let Some(description) = update.description.or_else(|| self.description.clone()) {
            builder = builder.description(description);
        }
        for dependency in update.dependencies.unwrap_or_else(|| self.dependencies.clone()) {
            builder = builder.dependency(dependency);
        }
        for tag in update.tags.unwrap_or_else(|| self.tags.clone()) {
            builder = builder.tag(tag);
        }

        let mut job = builder.build()?;
        job.id = self.id;
        job.created_at = self.created_at;
        Ok(job)
    }
}

// ---------------------------------------------------------------------------
// JobBuilder
// ---------------------------------------------------------------------------

/// Validating constructor for [`Job`].
#[derive(Debug, Clone)]
pub struct JobBuilder {
    name: String,
    description: Option<String>,
    dependencies: Vec<String>,
    trigger: TriggerSpec,
    timeout_secs: u64,
    max_retries: u32,
    enabled: bool,
    tags: Vec<String>,
    priority: Priority,
    plan: ExecutionPlan,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>, plan: ExecutionPlan) -> Self {
        Self {
            name: name.into(),
            description: None,
            dependencies: Vec::new(),
            trigger: TriggerSpec::Manual,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            enabled: true,
            tags: Vec::new(),
            priority: Priority::default(),
            plan,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn dependency(mut self, job_name: impl Into<String>) -> Self {
        self.dependencies.push(job_name.into());
        self
    }

    pub fn trigger(mut self, trigger: TriggerSpec) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Validate and produce a job with a fresh UUIDv7.
    ///
    /// Cron expressions are only checked for presence here; parsing happens
    /// where the cron engine lives.
    pub fn build(self) -> Result<Job, ConfigurationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigurationError::MissingField("name"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ConfigurationError::invalid(
                "name",
                format!("longer than {MAX_NAME_LEN} characters"),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigurationError::invalid(
                "timeout_secs",
                "must be greater than zero",
            ));
        }
        match &self.trigger {
            TriggerSpec::Interval { seconds: 0 } => {
                return Err(ConfigurationError::invalid(
                    "trigger.seconds",
                    "interval must be greater than zero",
                ));
            }
            TriggerSpec::Cron { expression } if expression.trim().is_empty() => {
                return Err(ConfigurationError::MissingField("trigger.expression"));
            }
            _ => {}
        }
        if self.dependencies.iter().any(|d| d.trim() == name) {
            return Err(ConfigurationError::invalid(
                "dependencies",
                "a job cannot depend on itself",
            ));
        }
        self.plan.validate()?;

        let mut dependencies: Vec<String> = Vec::new();
        for dependency in self.dependencies {
            let dependency = dependency.trim().to_string();
            if !dependency.is_empty() && !dependencies.contains(&dependency) {
                dependencies.push(dependency);
            }
        }

        let now = Utc::now();
        Ok(Job {
            id: Uuid::now_v7(),
            name,
            description: self.description,
            dependencies,
            trigger: self.trigger,
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            enabled: self.enabled,
            tags: self.tags,
            priority: self.priority,
            plan: self.plan,
            created_at: now,
            updated_at: now,
        })
    }
}
