//! Domain results and the consolidated cross-domain result.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::plan::{Domain, Priority};

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Severity of a finding. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One level more severe, saturating at `Critical`.
    pub fn elevated(self) -> Severity {
        match self {
            Severity::Info => Severity::Low,
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A single issue reported by a domain executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Issue key used to correlate the same problem across domains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Workload that produced the finding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Finding {
    pub fn new(id: impl Into<String>, title: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            severity,
            category: None,
            pattern: None,
            workload: None,
            description: None,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_workload(mut self, workload: impl Into<String>) -> Self {
        self.workload = Some(workload.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Domain results
// ---------------------------------------------------------------------------

/// Terminal status of one domain invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Passed,
    Failed,
    Error,
    Cancelled,
    Skipped,
}

impl DomainStatus {
    /// Passed and skipped results do not fail an attempt.
    pub fn is_success(&self) -> bool {
        matches!(self, DomainStatus::Passed | DomainStatus::Skipped)
    }

    /// Severity used when merging: the worse status wins.
    fn badness(&self) -> u8 {
        match self {
            DomainStatus::Skipped => 0,
            DomainStatus::Passed => 1,
            DomainStatus::Failed => 2,
            DomainStatus::Error => 3,
            DomainStatus::Cancelled => 4,
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DomainStatus::Passed => "passed",
            DomainStatus::Failed => "failed",
            DomainStatus::Error => "error",
            DomainStatus::Cancelled => "cancelled",
            DomainStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Outcome of running one domain's (sub-)plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainResult {
    pub domain: Domain,
    pub status: DomainStatus,
    /// Quality score in `[0, 1]`.
    pub score: f64,
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DomainResult {
    /// A result computed from pass/fail counts. The score is the pass rate.
    pub fn from_counts(domain: Domain, passed: u32, failed: u32) -> Self {
        let total = passed + failed;
        let score = if total == 0 {
            1.0
        } else {
            f64::from(passed) / f64::from(total)
        };
        Self {
            domain,
            status: if failed == 0 {
                DomainStatus::Passed
            } else {
                DomainStatus::Failed
            },
            score,
            passed,
            failed,
            total,
            findings: Vec::new(),
            duration_ms: 0,
            error: None,
        }
    }

    /// An executor or infrastructure error with no usable score.
    pub fn error(domain: Domain, message: impl Into<String>) -> Self {
        Self {
            domain,
            status: DomainStatus::Error,
            score: 0.0,
            passed: 0,
            failed: 0,
            total: 0,
            findings: Vec::new(),
            duration_ms: 0,
            error: Some(message.into()),
        }
    }

    pub fn cancelled(domain: Domain) -> Self {
        Self {
            status: DomainStatus::Cancelled,
            error: Some("cancelled".to_string()),
            ..Self::error(domain, "")
        }
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Fraction of passed checks, or the score when no counts were reported.
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            self.score
        } else {
            f64::from(self.passed) / f64::from(self.total)
        }
    }

    /// Fold the result of a later batch or phase for the same domain into
    /// this one.
    ///
    /// Counts and durations are summed, findings concatenated, the score is
    /// weighted by `total` with a floor of one, and the worse status wins.
    /// The first error message is kept. A side without counts, such as an
    /// executor error, therefore weighs as a single check.
    pub fn merge(&mut self, other: DomainResult) {
        debug_assert_eq!(self.domain, other.domain);
        let (lw, rw) = (self.score_weight(), other.score_weight());
        self.score = (self.score * lw + other.score * rw) / (lw + rw);
        self.passed += other.passed;
        self.failed += other.failed;
        self.total += other.total;
        self.duration_ms += other.duration_ms;
        self.findings.extend(other.findings);
        if other.status.badness() > self.status.badness() {
            self.status = other.status;
        }
        if self.error.is_none() {
            self.error = other.error;
        }
    }

    fn score_weight(&self) -> f64 {
        f64::from(self.total.max(1))
    }
}

// ---------------------------------------------------------------------------
// Consolidated result
// ---------------------------------------------------------------------------

/// Overall release risk derived from the weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// `>= 0.9` LOW, `>= 0.7` MEDIUM, `>= 0.5` HIGH, otherwise CRITICAL.
    pub fn from_score(score: f64) -> RiskLevel {
        if score >= 0.9 {
            RiskLevel::Low
        } else if score >= 0.7 {
            RiskLevel::Medium
        } else if score >= 0.5 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Relative weight of each domain in the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_functional_weight")]
    pub functional: f64,
    #[serde(default = "default_security_weight")]
    pub security: f64,
    #[serde(default = "default_compliance_weight")]
    pub compliance: f64,
}

fn default_functional_weight() -> f64 {
    0.4
}

fn default_security_weight() -> f64 {
    0.3
}

fn default_compliance_weight() -> f64 {
    0.3
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            functional: default_functional_weight(),
            security: default_security_weight(),
            compliance: default_compliance_weight(),
        }
    }
}

impl ScoringWeights {
    pub fn weight_for(&self, domain: Domain) -> f64 {
        match domain {
            Domain::Functional => self.functional,
            Domain::Security => self.security,
            Domain::Compliance => self.compliance,
        }
    }
}

/// Score summary of one domain inside a consolidated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainScore {
    pub domain: Domain,
    pub status: DomainStatus,
    pub score: f64,
    pub pass_rate: f64,
    /// Normalized weight applied; zero for domains excluded from scoring.
    pub weight: f64,
    pub findings: usize,
}

/// A finding pattern observed in more than one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonIssue {
    /// Normalized issue key.
    pub pattern: String,
    pub domains: Vec<Domain>,
    pub occurrences: usize,
    /// Highest severity among the correlated findings.
    pub severity: Severity,
    /// Severity after cross-domain elevation.
    pub elevated_severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

/// A remediation suggestion derived from the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

/// Deterministic roll-up of all domain results of one execution.
///
/// Carries no timestamp so that aggregating the same results twice yields
/// equal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedResult {
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub domain_scores: Vec<DomainScore>,
    /// Weights actually applied, renormalized over the scored domains.
    pub weights: BTreeMap<Domain, f64>,
    #[serde(default)]
    pub common_issues: Vec<CommonIssue>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    pub total_findings: usize,
    #[serde(default)]
    pub findings_by_severity: BTreeMap<Severity, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0.95), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.75), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.55), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.30), RiskLevel::Critical);
    }

    #[test]
    fn severity_elevation_saturates() {
        assert_eq!(Severity::Medium.elevated(), Severity::High);
        assert_eq!(Severity::Critical.elevated(), Severity::Critical);
        assert!(Severity::High > Severity::Low);
    }

    #[test]
    fn from_counts_scores_by_pass_rate() {
        let r = DomainResult::from_counts(Domain::Functional, 3, 1);
        assert_eq!(r.status, DomainStatus::Failed);
        assert_eq!(r.total, 4);
        assert!((r.score - 0.75).abs() < f64::EPSILON);

        let clean = DomainResult::from_counts(Domain::Security, 0, 0);
        assert_eq!(clean.status, DomainStatus::Passed);
        assert_eq!(clean.score, 1.0);
    }

    #[test]
    fn merge_weights_score_by_total_and_keeps_worst_status() {
        let mut first = DomainResult::from_counts(Domain::Functional, 4, 0)
            .with_findings(vec![Finding::new("f1", "slow page", Severity::Low)])
            .with_duration_ms(100);
        let second = DomainResult::from_counts(Domain::Functional, 0, 4)
            .with_findings(vec![Finding::new("f2", "broken link", Severity::Medium)])
            .with_duration_ms(50);

        first.merge(second);
        assert_eq!(first.total, 8);
        assert_eq!(first.passed, 4);
        assert_eq!(first.failed, 4);
        assert!((first.score - 0.5).abs() < 1e-9);
        assert_eq!(first.status, DomainStatus::Failed);
        assert_eq!(first.findings.len(), 2);
        assert_eq!(first.duration_ms, 150);
    }

    #[test]
    fn merge_with_error_lowers_the_score() {
        let mut r = DomainResult::from_counts(Domain::Security, 4, 0);
        r.merge(DomainResult::error(Domain::Security, "scanner crashed"));
        assert_eq!(r.status, DomainStatus::Error);
        assert_eq!(r.total, 4);
        assert!((r.score - 0.8).abs() < 1e-9);
        assert_eq!(r.error.as_deref(), Some("scanner crashed"));

        let mut errored = DomainResult::error(Domain::Security, "timeout");
        errored.merge(DomainResult::from_counts(Domain::Security, 4, 0));
        assert!((errored.score - 0.8).abs() < 1e-9);
        assert!(errored.score < 1.0);
    }

    #[test]
    fn merge_without_counts_is_a_plain_mean() {
        let mut r = DomainResult::from_counts(Domain::Compliance, 0, 0);
        r.merge(DomainResult::error(Domain::Compliance, "missing policy"));
        assert!((r.score - 0.5).abs() < 1e-9);
        assert_eq!(r.status, DomainStatus::Error);
    }

    #[test]
    fn merge_with_cancelled_is_cancelled() {
        let mut r = DomainResult::from_counts(Domain::Security, 1, 0);
        r.merge(DomainResult::cancelled(Domain::Security));
        assert_eq!(r.status, DomainStatus::Cancelled);
        assert_eq!(r.error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn risk_level_serializes_upper_case() {
        let json = serde_json::to_string(&RiskLevel::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }
}
