//! Cross-domain issue correlation.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use assayer_types::plan::Domain;
use assayer_types::result::{CommonIssue, DomainResult, Finding, Severity};

const MAX_EXAMPLES: usize = 3;

/// Normalize a finding pattern (or title) into a correlation key.
///
/// Lower-cases, turns punctuation into word breaks, and drops tokens that
/// look like identifiers (pure numbers, long hex strings) so that
/// "SQL-Injection in /api/v1/users/42" and "sql injection in api v1 users"
/// correlate.
pub fn normalize_issue_key(raw: &str) -> String {
    let lowered: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered
        .split_whitespace()
        .filter(|token| !looks_like_identifier(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_like_identifier(token: &str) -> bool {
    if token.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    token.len() >= 8
        && token.chars().all(|c| c.is_ascii_hexdigit())
        && token.chars().any(|c| c.is_ascii_digit())
}

/// Correlation key for a finding: its pattern if set, else its title.
pub fn finding_key(finding: &Finding) -> String {
    normalize_issue_key(finding.pattern.as_deref().unwrap_or(&finding.title))
}

#[derive(Default)]
struct Group {
    domains: BTreeSet<Domain>,
    occurrences: usize,
    severity: Severity,
    titles: BTreeSet<String>,
}

/// Find issue keys reported by more than one domain.
///
/// Each common issue's severity is the highest among its findings, elevated
/// one level because it recurs across domains. Ordered by elevated severity,
/// then number of domains, then key.
pub fn find_common_issues<'a>(results: impl IntoIterator<Item = &'a DomainResult>) -> Vec<CommonIssue> {
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    for result in results {
        for finding in &result.findings {
            let key = finding_key(finding);
            if key.is_empty() {
                continue;
            }
            let group = groups.entry(key).or_default();
            group.domains.insert(result.domain);
            group.occurrences += 1;
            group.severity = group.severity.max(finding.severity);
            group.titles.insert(finding.title.clone());
        }
    }

    let mut issues: Vec<CommonIssue> = groups
        .into_iter()
        .filter(|(_, g)| g.domains.len() > 1)
        .map(|(pattern, g)| CommonIssue {
            pattern,
            domains: g.domains.into_iter().collect(),
            occurrences: g.occurrences,
            severity: g.severity,
            elevated_severity: g.severity.elevated(),
            examples: g.titles.into_iter().take(MAX_EXAMPLES).collect(),
        })
        .collect();

    issues.sort_by(|a, b| {
        (Reverse(a.elevated_severity), Reverse(a.domains.len()), &a.pattern).cmp(&(
            Reverse(b.elevated_severity),
            Reverse(b.domains.len()),
            &b.pattern,
        ))
    });
    issues
}
