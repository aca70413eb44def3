//! Result aggregation: weighted overall score, risk level, cross-domain
//! issues and recommendations.
//!
//! Aggregation is a pure function of the input results. Results for the
//! same domain are merged first; every collection in the output is ordered
//! deterministically, so aggregating the same results twice yields equal
//! `ConsolidatedResult`s.

pub mod issues;
pub mod recommend;

use std::collections::BTreeMap;

use assayer_types::plan::Domain;
use assayer_types::result::{
    ConsolidatedResult, DomainResult, DomainScore, DomainStatus, RiskLevel, ScoringWeights,
};

pub use issues::{find_common_issues, normalize_issue_key};
pub use recommend::recommend;

/// Round to 6 decimal places so float noise never moves a risk threshold.
fn round_score(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator {
    weights: ScoringWeights,
}

impl ResultAggregator {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Consolidate domain results.
    ///
    /// Skipped domains are reported but carry no weight. Weights of the
    /// scored domains are renormalized to sum to 1. With nothing to score
    /// the overall score is 0.
    pub fn aggregate(&self, results: &[DomainResult]) -> ConsolidatedResult {
        let mut by_domain: BTreeMap<Domain, DomainResult> = BTreeMap::new();
        for result in results {
            let mut result = result.clone();
            result.score = if result.score.is_finite() {
                result.score.clamp(0.0, 1.0)
            } else {
                0.0
            };
            match by_domain.get_mut(&result.domain) {
                Some(existing) => existing.merge(result),
                None => {
                    by_domain.insert(result.domain, result);
                }
            }
        }

        let scored: Vec<Domain> = by_domain
            .values()
            .filter(|r| r.status != DomainStatus::Skipped)
            .map(|r| r.domain)
            .collect();
        let raw: BTreeMap<Domain, f64> = scored
            .iter()
            .map(|&d| {
                let w = self.weights.weight_for(d);
                (d, if w.is_finite() && w > 0.0 { w } else { 0.0 })
            })
            .collect();
        let total: f64 = raw.values().sum();
        let weights: BTreeMap<Domain, f64> = if total > 0.0 {
            raw.iter().map(|(&d, &w)| (d, w / total)).collect()
        } else if !scored.is_empty() {
            let equal = 1.0 / scored.len() as f64;
            scored.iter().map(|&d| (d, equal)).collect()
        } else {
            BTreeMap::new()
        };

        let overall_score = round_score(
            weights
                .iter()
                .map(|(d, w)| w * by_domain[d].score)
                .sum::<f64>(),
        );
        let risk_level = RiskLevel::from_score(overall_score);

        let weights: BTreeMap<Domain, f64> =
            weights.into_iter().map(|(d, w)| (d, round_score(w))).collect();

        let domain_scores = by_domain
            .values()
            .map(|r| DomainScore {
                domain: r.domain,
                status: r.status,
                score: round_score(r.score),
                pass_rate: round_score(r.pass_rate()),
                weight: weights.get(&r.domain).copied().unwrap_or(0.0),
                findings: r.findings.len(),
            })
            .collect();

        let mut findings_by_severity = BTreeMap::new();
        let mut total_findings = 0;
        for finding in by_domain.values().flat_map(|r| &r.findings) {
            *findings_by_severity.entry(finding.severity).or_insert(0) += 1;
            total_findings += 1;
        }

        let common_issues = find_common_issues(by_domain.values());
        let recommendations = recommend(overall_score, risk_level, &by_domain, &common_issues);

        tracing::debug!(
            overall_score,
            %risk_level,
            domains = by_domain.len(),
            common_issues = common_issues.len(),
            "aggregated domain results"
        );

        ConsolidatedResult {
            overall_score,
            risk_level,
            domain_scores,
            weights,
            common_issues,
            recommendations,
            total_findings,
            findings_by_severity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assayer_types::result::{Finding, Severity};

    fn scored(domain: Domain, score: f64) -> DomainResult {
        DomainResult {
            score,
            ..DomainResult::from_counts(domain, 1, 0)
        }
    }

    fn all_domains(score: f64) -> Vec<DomainResult> {
        Domain::ALL.iter().map(|&d| scored(d, score)).collect()
    }

    #[test]
    fn perfect_scores_are_low_risk() {
        let result = ResultAggregator::default().aggregate(&all_domains(1.0));
        assert_eq!(result.overall_score, 1.0);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(result.recommendations.is_empty());
        assert_eq!(result.weights[&Domain::Functional], 0.4);
    }

    #[test]
    fn risk_levels_follow_overall_score() {
        let aggregator = ResultAggregator::default();
        for (score, risk) in [
            (0.95, RiskLevel::Low),
            (0.75, RiskLevel::Medium),
            (0.55, RiskLevel::High),
            (0.30, RiskLevel::Critical),
        ] {
            let result = aggregator.aggregate(&all_domains(score));
            assert_eq!(result.overall_score, score);
            assert_eq!(result.risk_level, risk, "score {score}");
        }
    }

    #[test]
    fn weights_renormalize_over_present_domains() {
        let result = ResultAggregator::default().aggregate(&[
            scored(Domain::Functional, 1.0),
            scored(Domain::Security, 0.5),
        ]);
        // (0.4 * 1.0 + 0.3 * 0.5) / 0.7
        assert_eq!(result.overall_score, 0.785714);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert!(!result.weights.contains_key(&Domain::Compliance));
    }

    #[test]
    fn skipped_domains_carry_no_weight() {
        let mut skipped = scored(Domain::Compliance, 0.0);
        skipped.status = DomainStatus::Skipped;
        let result = ResultAggregator::default()
            .aggregate(&[scored(Domain::Functional, 0.9), skipped]);
        assert_eq!(result.overall_score, 0.9);
        assert_eq!(result.domain_scores.len(), 2);
        assert_eq!(result.domain_scores[1].weight, 0.0);
    }

    #[test]
    fn empty_input_is_critical() {
        let result = ResultAggregator::default().aggregate(&[]);
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn aggregation_is_idempotent_and_order_independent() {
        let results = vec![
            scored(Domain::Security, 0.6).with_findings(vec![
                Finding::new("s1", "Weak TLS", Severity::Medium).with_pattern("weak tls"),
                Finding::new("s2", "SQL injection", Severity::Critical),
            ]),
            scored(Domain::Compliance, 0.8).with_findings(vec![
                Finding::new("c1", "TLS misconfigured", Severity::Low).with_pattern("Weak-TLS"),
            ]),
            scored(Domain::Functional, 0.7),
        ];
        let aggregator = ResultAggregator::default();
        let first = aggregator.aggregate(&results);
        let second = aggregator.aggregate(&results);
        assert_eq!(first, second);

        let mut reversed = results.clone();
        reversed.reverse();
        assert_eq!(aggregator.aggregate(&reversed), first);

        assert_eq!(first.total_findings, 3);
        assert_eq!(first.findings_by_severity[&Severity::Critical], 1);
        assert_eq!(first.common_issues.len(), 1);
        assert_eq!(first.common_issues[0].elevated_severity, Severity::High);
    }

    #[test]
    fn duplicate_domain_results_are_merged() {
        let result = ResultAggregator::default().aggregate(&[
            DomainResult::from_counts(Domain::Functional, 3, 0),
            DomainResult::from_counts(Domain::Functional, 0, 1),
        ]);
        assert_eq!(result.domain_scores.len(), 1);
        assert_eq!(result.domain_scores[0].pass_rate, 0.75);
        assert_eq!(result.overall_score, 0.75);
    }
}
