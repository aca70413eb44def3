//! Strategy -> phase planning.
//!
//! Every strategy reduces to an ordered list of phases. Domains inside a
//! phase run concurrently; a phase starts only after the previous one has
//! fully finished.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use assayer_types::plan::{Domain, DomainPlan, ExecutionPlan, ExecutionStrategy, PhaseHint};
use serde::Serialize;

use crate::schedule::batch::nodes_from_plan;

/// A barrier-delimited group of concurrent domain invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub label: &'static str,
    pub members: Vec<(Domain, DomainPlan)>,
}

/// Split one batch's per-domain sub-plans into phases for `strategy`.
///
/// Empty sub-plans and empty phases are dropped.
pub fn plan_phases(
    strategy: ExecutionStrategy,
    batch: &BTreeMap<Domain, DomainPlan>,
) -> Vec<Phase> {
    let pick = |domains: &[Domain], keep: &dyn Fn(Domain, PhaseHint) -> bool| -> Vec<(Domain, DomainPlan)> {
        domains
            .iter()
            .filter_map(|&d| {
                let sub = batch.get(&d)?.filtered(|w| keep(d, w.phase));
                (!sub.is_empty()).then_some((d, sub))
            })
            .collect()
    };
    let everything = |_: Domain, _: PhaseHint| true;

    let phases = match strategy {
        ExecutionStrategy::Sequential => Domain::ALL
            .iter()
            .map(|&d| Phase {
                label: d.as_str(),
                members: pick(&[d], &everything),
            })
            .collect(),
        ExecutionStrategy::Parallel => vec![Phase {
            label: "all",
            members: pick(&Domain::ALL, &everything),
        }],
        ExecutionStrategy::Layered => vec![
            Phase {
                label: "functional",
                members: pick(&[Domain::Functional], &everything),
            },
            Phase {
                label: "security+compliance",
                members: pick(&[Domain::Security, Domain::Compliance], &everything),
            },
        ],
        ExecutionStrategy::Integrated => {
            let smoke = |d: Domain, p: PhaseHint| d == Domain::Functional && p == PhaseHint::Smoke;
            let baseline = |d: Domain, p: PhaseHint| d != Domain::Functional && p == PhaseHint::Baseline;
            vec![
                Phase {
                    label: "smoke",
                    members: pick(&[Domain::Functional], &smoke),
                },
                Phase {
                    label: "baseline",
                    members: pick(&[Domain::Security, Domain::Compliance], &baseline),
                },
                Phase {
                    label: "comprehensive",
                    members: pick(&Domain::ALL, &|d: Domain, p: PhaseHint| {
                        !smoke(d, p) && !baseline(d, p)
                    }),
                },
            ]
        }
    };

    phases.into_iter().filter(|p| !p.members.is_empty()).collect()
}

/// A workload whose dependency belongs to a later phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseConflict {
    pub workload: String,
    pub phase: String,
    pub dependency: String,
    pub dependency_phase: String,
}

/// Dependencies that contradict the strategy's phase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseOrderError {
    pub strategy: ExecutionStrategy,
    pub conflicts: Vec<PhaseConflict>,
}

impl fmt::Display for PhaseOrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conflicts: Vec<String> = self
            .conflicts
            .iter()
            .map(|c| {
                format!(
                    "{} ({}) -> {} ({})",
                    c.workload, c.phase, c.dependency, c.dependency_phase
                )
            })
            .collect();
        write!(
            f,
            "dependencies against the {} phase order: {}",
            self.strategy,
            conflicts.join(", ")
        )
    }
}

impl std::error::Error for PhaseOrderError {}

/// Find dependencies that can only run after the workload needing them.
///
/// Dependencies on names without a phase (dependency-map keys, missing
/// names) are left to batch diagnosis.
pub fn phase_conflicts(plan: &ExecutionPlan) -> Vec<PhaseConflict> {
    let domains: BTreeMap<Domain, DomainPlan> = plan
        .domain_plans()
        .map(|(d, p)| (d, p.clone()))
        .collect();
    let phases = plan_phases(plan.strategy, &domains);
    let phase_of: HashMap<&str, (usize, &'static str)> = phases
        .iter()
        .enumerate()
        .flat_map(|(i, phase)| {
            phase.members.iter().flat_map(move |(_, sub)| {
                sub.workloads.iter().map(move |w| (w.name.as_str(), (i, phase.label)))
            })
        })
        .collect();

    let mut conflicts = Vec::new();
    for node in nodes_from_plan(plan) {
        let Some(&(own, own_label)) = phase_of.get(node.name.as_str()) else {
            continue;
        };
        for dep in &node.depends_on {
            let Some(&(theirs, their_label)) = phase_of.get(dep.as_str()) else {
                continue;
            };
            if theirs > own {
                conflicts.push(PhaseConflict {
                    workload: node.name.clone(),
                    phase: own_label.to_string(),
                    dependency: dep.clone(),
                    dependency_phase: their_label.to_string(),
                });
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use assayer_types::plan::Workload;

    fn batch() -> BTreeMap<Domain, DomainPlan> {
        BTreeMap::from([
            (
                Domain::Functional,
                DomainPlan::new(vec![
                    Workload::new("login").with_phase(PhaseHint::Smoke),
                    Workload::new("checkout"),
                ]),
            ),
            (
                Domain::Security,
                DomainPlan::new(vec![
                    Workload::new("headers").with_phase(PhaseHint::Baseline),
                    Workload::new("dast"),
                ]),
            ),
            (
                Domain::Compliance,
                DomainPlan::new(vec![Workload::new("gdpr")]),
            ),
        ])
    }

    fn shape(phases: &[Phase]) -> Vec<(&str, Vec<(Domain, Vec<String>)>)> {
        phases
            .iter()
            .map(|p| {
                (
                    p.label,
                    p.members
                        .iter()
                        .map(|(d, plan)| {
                            (*d, plan.workloads.iter().map(|w| w.name.clone()).collect())
                        })
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn sequential_runs_one_domain_per_phase() {
        let phases = plan_phases(ExecutionStrategy::Sequential, &batch());
        let labels: Vec<&str> = phases.iter().map(|p| p.label).collect();
        assert_eq!(labels, vec!["functional", "security", "compliance"]);
        assert!(phases.iter().all(|p| p.members.len() == 1));
    }

    #[test]
    fn parallel_runs_everything_at_once() {
        let phases = plan_phases(ExecutionStrategy::Parallel, &batch());
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].members.len(), 3);
    }

    #[test]
    fn layered_puts_functional_first() {
        let phases = plan_phases(ExecutionStrategy::Layered, &batch());
        let s = shape(&phases);
        assert_eq!(s[0].1.len(), 1);
        assert_eq!(s[0].1[0].0, Domain::Functional);
        assert_eq!(
            s[1].1.iter().map(|(d, _)| *d).collect::<Vec<_>>(),
            vec![Domain::Security, Domain::Compliance]
        );
    }

    #[test]
    fn integrated_splits_by_phase_hint() {
        let phases = plan_phases(ExecutionStrategy::Integrated, &batch());
        assert_eq!(
            shape(&phases),
            vec![
                ("smoke", vec![(Domain::Functional, vec!["login".to_string()])]),
                ("baseline", vec![(Domain::Security, vec!["headers".to_string()])]),
                (
                    "comprehensive",
                    vec![
                        (Domain::Functional, vec!["checkout".to_string()]),
                        (Domain::Security, vec!["dast".to_string()]),
                        (Domain::Compliance, vec!["gdpr".to_string()]),
                    ]
                ),
            ]
        );
    }

    #[test]
    fn dependency_on_a_later_phase_is_a_conflict() {
        let plan = ExecutionPlan::new(ExecutionStrategy::Layered)
            .with_domain(
                Domain::Functional,
                DomainPlan::new(vec![Workload::new("e2e").depends_on("scan")]),
            )
            .with_domain(Domain::Security, DomainPlan::new(vec![Workload::new("scan")]))
            .with_domain(
                Domain::Compliance,
                DomainPlan::new(vec![Workload::new("gdpr").depends_on("e2e")]),
            );

        let conflicts = phase_conflicts(&plan);
        assert_eq!(
            conflicts,
            vec![PhaseConflict {
                workload: "e2e".into(),
                phase: "functional".into(),
                dependency: "scan".into(),
                dependency_phase: "security+compliance".into(),
            }]
        );

        let parallel = ExecutionPlan {
            strategy: ExecutionStrategy::Parallel,
            ..plan
        };
        assert!(phase_conflicts(&parallel).is_empty());
    }

    #[test]
    fn absent_domains_and_empty_phases_are_dropped() {
        let only_security = BTreeMap::from([(
            Domain::Security,
            DomainPlan::new(vec![Workload::new("dast")]),
        )]);
        let layered = plan_phases(ExecutionStrategy::Layered, &only_security);
        assert_eq!(layered.len(), 1);
        assert_eq!(layered[0].label, "security+compliance");

        let integrated = plan_phases(ExecutionStrategy::Integrated, &only_security);
        assert_eq!(integrated.len(), 1);
        assert_eq!(integrated[0].label, "comprehensive");
    }
}
