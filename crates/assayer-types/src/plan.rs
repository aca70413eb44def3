//! Execution plan types.
//!
//! An `ExecutionPlan` holds at most one `DomainPlan` per testing domain, the
//! strategy used to drive the domains, an extra dependency map between
//! workloads and a free-form context handed to every domain executor.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// A testing domain. Closed set: every plan slot and executor maps to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Functional,
    Security,
    Compliance,
}

impl Domain {
    /// All domains in canonical order (functional, security, compliance).
    pub const ALL: [Domain; 3] = [Domain::Functional, Domain::Security, Domain::Compliance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Functional => "functional",
            Domain::Security => "security",
            Domain::Compliance => "compliance",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "functional" => Ok(Domain::Functional),
            "security" => Ok(Domain::Security),
            "compliance" => Ok(Domain::Compliance),
            other => Err(format!("unknown domain '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy / priority / phase
// ---------------------------------------------------------------------------

/// How the coordinator drives the domains of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Functional, then security, then compliance; one at a time.
    Sequential,
    /// All domains at once.
    Parallel,
    /// Functional to completion, then security and compliance together.
    #[default]
    Layered,
    /// Smoke functional, then baseline security + compliance, then the rest.
    Integrated,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Layered => "layered",
            ExecutionStrategy::Integrated => "integrated",
        };
        f.write_str(s)
    }
}

/// Priority of a workload, job, or recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Numeric rank; higher runs first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 3,
            Priority::High => 2,
            Priority::Medium => 1,
            Priority::Low => 0,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// Which phase of the integrated strategy a workload belongs to.
///
/// Ignored by every other strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseHint {
    /// Fast functional checks run before anything else.
    Smoke,
    /// Baseline security/compliance checks.
    Baseline,
    #[default]
    Comprehensive,
}

// ---------------------------------------------------------------------------
// Workloads and plans
// ---------------------------------------------------------------------------

/// A single named unit of testing work within a domain plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Unique within the whole plan.
    pub name: String,
    #[serde(default)]
    pub priority: Priority,
    /// Names of workloads that must finish in an earlier batch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, alias = "phase_hint")]
    pub phase: PhaseHint,
    /// Program to run, for executors that spawn processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl Workload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: Priority::default(),
            depends_on: Vec::new(),
            phase: PhaseHint::default(),
            command: None,
            args: Vec::new(),
            settings: serde_json::Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_phase(mut self, phase: PhaseHint) -> Self {
        self.phase = phase;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.command = Some(command.into());
        self.args = args;
        self
    }
}

/// The workloads and settings for one domain.
///
/// The domain itself is implied by the `ExecutionPlan` slot holding it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainPlan {
    #[serde(default)]
    pub workloads: Vec<Workload>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl DomainPlan {
    pub fn new(workloads: Vec<Workload>) -> Self {
        Self {
            workloads,
            settings: serde_json::Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    /// A copy of this plan restricted to the workloads matching `keep`.
    ///
    /// Settings are carried over unchanged.
    pub fn filtered(&self, mut keep: impl FnMut(&Workload) -> bool) -> DomainPlan {
        DomainPlan {
            workloads: self.workloads.iter().filter(|w| keep(w)).cloned().collect(),
            settings: self.settings.clone(),
        }
    }
}

/// Everything needed to run one consolidated test pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub strategy: ExecutionStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functional: Option<DomainPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<DomainPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<DomainPlan>,
    /// Extra dependency edges: workload name -> names it waits for.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Free-form values passed to every executor invocation.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionPlan {
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Builder-style setter for a domain slot.
    pub fn with_domain(mut self, domain: Domain, plan: DomainPlan) -> Self {
        *self.slot_mut(domain) = Some(plan);
        self
    }

    pub fn domain_plan(&self, domain: Domain) -> Option<&DomainPlan> {
        match domain {
            Domain::Functional => self.functional.as_ref(),
            Domain::Security => self.security.as_ref(),
            Domain::Compliance => self.compliance.as_ref(),
        }
    }

    fn slot_mut(&mut self, domain: Domain) -> &mut Option<DomainPlan> {
        match domain {
            Domain::Functional => &mut self.functional,
            Domain::Security => &mut self.security,
            Domain::Compliance => &mut self.compliance,
        }
    }

    /// Present domain plans in canonical domain order.
    pub fn domain_plans(&self) -> impl Iterator<Item = (Domain, &DomainPlan)> {
        Domain::ALL
            .into_iter()
            .filter_map(|d| self.domain_plan(d).map(|p| (d, p)))
    }

    /// Every workload paired with its domain, in declaration order.
    pub fn workloads(&self) -> impl Iterator<Item = (Domain, &Workload)> {
        self.domain_plans()
            .flat_map(|(d, p)| p.workloads.iter().map(move |w| (d, w)))
    }

    /// Reject plans that cannot be run.
    ///
    /// A plan needs at least one domain, every present domain needs at least
    /// one workload, and workload names must be non-empty and unique across
    /// the whole plan.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.domain_plans().next().is_none() {
            return Err(ConfigurationError::EmptyPlan);
        }
        let mut seen = HashSet::new();
        for (domain, plan) in self.domain_plans() {
            if plan.is_empty() {
                return Err(ConfigurationError::invalid(
                    "plan",
                    format!("{domain} plan has no workloads"),
                ));
            }
            for workload in &plan.workloads {
                if workload.name.trim().is_empty() {
                    return Err(ConfigurationError::MissingField("workload.name"));
                }
                if !seen.insert(workload.name.as_str()) {
                    return Err(ConfigurationError::DuplicateWorkload(workload.name.clone()));
                }
            }
        }
        Ok(())
    }
}
