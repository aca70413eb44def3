//! Remediation recommendations derived from a consolidated result.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use assayer_types::plan::{Domain, Priority};
use assayer_types::result::{
    CommonIssue, DomainResult, DomainStatus, Recommendation, RiskLevel, Severity,
};

use super::issues::finding_key;

/// Scores below this produce an improvement recommendation.
const PASS_RATE_TARGET: f64 = 0.7;
const MAX_LISTED_FINDINGS: usize = 5;

fn priority_for(severity: Severity) -> Priority {
    match severity {
        Severity::Critical => Priority::Critical,
        Severity::High => Priority::High,
        Severity::Medium => Priority::Medium,
        Severity::Low | Severity::Info => Priority::Low,
    }
}

fn domain_action(domain: Domain) -> &'static str {
    match domain {
        Domain::Functional => "Fix failing test cases and re-run the regression suite",
        Domain::Security => "Re-scan the affected components after remediation",
        Domain::Compliance => "Review control evidence with the control owner",
    }
}

/// Build the recommendation list.
///
/// Output order is deterministic: priority (critical first), then
/// category, then title.
pub fn recommend(
    overall_score: f64,
    risk: RiskLevel,
    results: &BTreeMap<Domain, DomainResult>,
    common: &[CommonIssue],
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    match risk {
        RiskLevel::Critical => out.push(Recommendation {
            priority: Priority::Critical,
            category: "release".to_string(),
            domain: None,
            title: "Block release until critical risk is resolved".to_string(),
            description: format!("Overall score {overall_score:.2} is below 0.50"),
            actions: vec!["Address critical and high findings before the next release".to_string()],
        }),
        RiskLevel::High => out.push(Recommendation {
            priority: Priority::High,
            category: "release".to_string(),
            domain: None,
            title: "Hold release pending remediation".to_string(),
            description: format!("Overall score {overall_score:.2} is below 0.70"),
            actions: Vec::new(),
        }),
        RiskLevel::Medium | RiskLevel::Low => {}
    }

    let common_keys: BTreeSet<&str> = common.iter().map(|c| c.pattern.as_str()).collect();

    for (&domain, result) in results {
        match result.status {
            DomainStatus::Error => out.push(Recommendation {
                priority: Priority::High,
                category: domain.to_string(),
                domain: Some(domain),
                title: format!("Restore {domain} test execution"),
                description: result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{domain} executor reported an error")),
                actions: vec!["Check executor configuration and logs".to_string()],
            }),
            DomainStatus::Cancelled => out.push(Recommendation {
                priority: Priority::Medium,
                category: domain.to_string(),
                domain: Some(domain),
                title: format!("Re-run cancelled {domain} tests"),
                description: format!("{domain} results are incomplete because the run was cancelled"),
                actions: Vec::new(),
            }),
            DomainStatus::Passed | DomainStatus::Failed if result.score < PASS_RATE_TARGET => {
                out.push(Recommendation {
                    priority: if result.score < 0.5 {
                        Priority::High
                    } else {
                        Priority::Medium
                    },
                    category: domain.to_string(),
                    domain: Some(domain),
                    title: format!("Improve {domain} pass rate"),
                    description: format!(
                        "{domain} scored {:.2} ({} of {} checks failed)",
                        result.score, result.failed, result.total
                    ),
                    actions: vec![domain_action(domain).to_string()],
                });
            }
            _ => {}
        }

        // Severe findings not already covered by a cross-domain issue.
        let severe: Vec<_> = result
            .findings
            .iter()
            .filter(|f| f.severity >= Severity::High)
            .filter(|f| !common_keys.contains(finding_key(f).as_str()))
            .collect();
        if !severe.is_empty() {
            let worst = severe.iter().map(|f| f.severity).max().unwrap_or(Severity::High);
            let titles: BTreeSet<&str> = severe.iter().map(|f| f.title.as_str()).collect();
            let label = if worst == Severity::Critical {
                "critical"
            } else {
                "high-severity"
            };
            out.push(Recommendation {
                priority: priority_for(worst),
                category: domain.to_string(),
                domain: Some(domain),
                title: format!("Remediate {} {label} {domain} findings", severe.len()),
                description: format!("{domain} reported {} findings at high severity or above", severe.len()),
                actions: titles
                    .into_iter()
                    .take(MAX_LISTED_FINDINGS)
                    .map(|t| format!("Fix: {t}"))
                    .collect(),
            });
        }
    }

    for issue in common {
        let domains: Vec<String> = issue.domains.iter().map(Domain::to_string).collect();
        out.push(Recommendation {
            priority: priority_for(issue.elevated_severity),
            category: "cross_domain".to_string(),
            domain: None,
            title: format!("Fix recurring issue '{}'", issue.pattern),
            description: format!(
                "Reported by {} ({} occurrences); severity raised from {} to {}",
                domains.join(", "),
                issue.occurrences,
                issue.severity,
                issue.elevated_severity
            ),
            actions: issue
                .domains
                .iter()
                .map(|d| domain_action(*d).to_string())
                .collect(),
        });
    }

    out.sort_by(|a, b| {
        (Reverse(a.priority.rank()), &a.category, &a.title).cmp(&(
            Reverse(b.priority.rank()),
            &b.category,
            &b.title,
        ))
    });
    out
}
