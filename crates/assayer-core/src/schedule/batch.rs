//! Dependency-aware batch computation.
//!
//! Workloads are grouped into ordered batches: a workload joins the first
//! batch in which every one of its dependencies has already been placed in an
//! earlier batch. Within a batch, workloads are ordered by descending
//! priority, then by declaration order.
//!
//! When no remaining workload can be placed (a cycle, or a dependency on a
//! name that does not exist) the remainder is forced into one final batch and
//! a warning is logged, unless the caller asked for [`BatchMode::Strict`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use assayer_types::config::BatchMode;
use assayer_types::plan::{ExecutionPlan, Priority};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Input / output types
// ---------------------------------------------------------------------------

/// One schedulable item: a workload, or a job in a batched trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchNode {
    pub name: String,
    pub depends_on: Vec<String>,
    pub priority: Priority,
}

impl BatchNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            priority: Priority::default(),
        }
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A set of items that may run together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub index: usize,
    pub workloads: Vec<String>,
    /// Whether this is a forced batch of unresolvable items.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub forced: bool,
}

/// A dependency that names nothing in the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingDependency {
    pub workload: String,
    pub missing: String,
}

/// Why the remaining items could not be ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyGraphError {
    /// Items that never became ready, in declaration order.
    pub unresolved: Vec<String>,
    pub dangling: Vec<DanglingDependency>,
    /// Strongly connected components (sorted names) among the unresolved.
    pub cycles: Vec<Vec<String>>,
}

impl fmt::Display for DependencyGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unresolvable dependencies for [{}]", self.unresolved.join(", "))?;
        if !self.dangling.is_empty() {
            let dangling: Vec<String> = self
                .dangling
                .iter()
                .map(|d| format!("{} -> {}", d.workload, d.missing))
                .collect();
            write!(f, "; dangling: {}", dangling.join(", "))?;
        }
        if !self.cycles.is_empty() {
            let cycles: Vec<String> = self
                .cycles
                .iter()
                .map(|c| format!("{{{}}}", c.join(", ")))
                .collect();
            write!(f, "; cycles: {}", cycles.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for DependencyGraphError {}

/// Ordered batches plus the reason batching had to be forced, if it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced: Option<DependencyGraphError>,
}

impl BatchPlan {
    pub fn is_forced(&self) -> bool {
        self.forced.is_some()
    }

    /// Index of the batch containing `name`.
    pub fn batch_of(&self, name: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|b| b.workloads.iter().any(|w| w == name))
    }
}

// ---------------------------------------------------------------------------
// Plan -> nodes
// ---------------------------------------------------------------------------

/// Flatten a plan into batch nodes.
///
/// A workload's dependencies are its own `depends_on` plus the plan's
/// `dependencies` entry for its name. Keys of the dependency map that are
/// not workloads still become nodes so that every name in the map is placed
/// in a batch; the coordinator has nothing to run for them.
pub fn nodes_from_plan(plan: &ExecutionPlan) -> Vec<BatchNode> {
    let mut nodes: Vec<BatchNode> = plan
        .workloads()
        .map(|(_, w)| {
            let mut depends_on = w.depends_on.clone();
            if let Some(extra) = plan.dependencies.get(&w.name) {
                depends_on.extend(extra.iter().cloned());
            }
            BatchNode {
                name: w.name.clone(),
                depends_on,
                priority: w.priority,
            }
        })
        .collect();

    let declared: HashSet<String> = nodes.iter().map(|n| n.name.clone()).collect();
    for (name, deps) in &plan.dependencies {
        if !declared.contains(name) {
            nodes.push(BatchNode {
                name: name.clone(),
                depends_on: deps.clone(),
                priority: Priority::default(),
            });
        }
    }
    nodes
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// Group `nodes` into dependency batches.
///
/// Always terminates and never drops an item in [`BatchMode::Forced`]. In
/// [`BatchMode::Strict`] an unresolvable graph is returned as an error.
pub fn build_batches(
    nodes: &[BatchNode],
    mode: BatchMode,
) -> Result<BatchPlan, DependencyGraphError> {
    let nodes = merge_duplicates(nodes);

    let mut placed: HashSet<&str> = HashSet::with_capacity(nodes.len());
    let mut remaining: Vec<usize> = (0..nodes.len()).collect();
    let mut batches: Vec<Batch> = Vec::new();
    let mut forced = None;

    while !remaining.is_empty() {
        let (mut ready, blocked): (Vec<usize>, Vec<usize>) = remaining
            .iter()
            .partition(|&&i| nodes[i].depends_on.iter().all(|d| placed.contains(d.as_str())));

        if ready.is_empty() {
            let error = diagnose(&nodes, &blocked);
            if mode == BatchMode::Strict {
                return Err(error);
            }
            tracing::warn!(
                unresolved = ?error.unresolved,
                dangling = error.dangling.len(),
                cycles = ?error.cycles,
                "dependency graph not resolvable; forcing remaining workloads into a final batch"
            );
            let mut rest = blocked;
            sort_by_priority(&nodes, &mut rest);
            batches.push(Batch {
                index: batches.len(),
                workloads: rest.iter().map(|&i| nodes[i].name.clone()).collect(),
                forced: true,
            });
            forced = Some(error);
            break;
        }

        sort_by_priority(&nodes, &mut ready);
        placed.extend(ready.iter().map(|&i| nodes[i].name.as_str()));
        batches.push(Batch {
            index: batches.len(),
            workloads: ready.iter().map(|&i| nodes[i].name.clone()).collect(),
            forced: false,
        });
        remaining = blocked;
    }

    tracing::debug!(batches = batches.len(), nodes = nodes.len(), "computed dependency batches");
    Ok(BatchPlan { batches, forced })
}

/// Descending priority, then declaration order (indices are declaration order).
fn sort_by_priority(nodes: &[BatchNode], indices: &mut [usize]) {
    indices.sort_by_key(|&i| (std::cmp::Reverse(nodes[i].priority.rank()), i));
}

/// First declaration wins; later duplicates contribute their dependencies.
fn merge_duplicates(nodes: &[BatchNode]) -> Vec<BatchNode> {
    let mut merged: Vec<BatchNode> = Vec::with_capacity(nodes.len());
    let mut index: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        match index.get(node.name.as_str()) {
            Some(&i) => {
                tracing::warn!(workload = %node.name, "duplicate workload name; merging dependencies");
                for dep in &node.depends_on {
                    if !merged[i].depends_on.contains(dep) {
                        merged[i].depends_on.push(dep.clone());
                    }
                }
            }
            None => {
                index.insert(node.name.as_str(), merged.len());
                merged.push(node.clone());
            }
        }
    }
    merged
}

fn diagnose(nodes: &[BatchNode], unresolved: &[usize]) -> DependencyGraphError {
    let known: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();

    let dangling = unresolved
        .iter()
        .flat_map(|&i| {
            let node = &nodes[i];
            node.depends_on
                .iter()
                .filter(|d| !known.contains(d.as_str()))
                .map(|d| DanglingDependency {
                    workload: node.name.clone(),
                    missing: d.clone(),
                })
        })
        .collect();

    // Edge from dependency -> dependent, restricted to unresolved nodes.
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, NodeIndex> = unresolved
        .iter()
        .map(|&i| (nodes[i].name.as_str(), graph.add_node(nodes[i].name.as_str())))
        .collect();
    for &i in unresolved {
        let to = indices[nodes[i].name.as_str()];
        for dep in &nodes[i].depends_on {
            if let Some(&from) = indices.get(dep.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut names: Vec<String> = scc.iter().map(|&n| graph[n].to_string()).collect();
            names.sort();
            names
        })
        .collect();
    cycles.sort();

    DependencyGraphError {
        unresolved: unresolved.iter().map(|&i| nodes[i].name.clone()).collect(),
        dangling,
        cycles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assayer_types::plan::{Domain, DomainPlan, Workload};

    fn node(name: &str, deps: &[&str]) -> BatchNode {
        deps.iter()
            .fold(BatchNode::new(name), |n, d| n.depends_on(*d))
    }

    fn names(plan: &BatchPlan) -> Vec<Vec<&str>> {
        plan.batches
            .iter()
            .map(|b| b.workloads.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let plan = build_batches(&[], BatchMode::Forced).unwrap();
        assert!(plan.batches.is_empty());
        assert!(!plan.is_forced());
    }

    #[test]
    fn independent_workloads_share_one_batch() {
        let plan = build_batches(&[node("a", &[]), node("b", &[]), node("c", &[])], BatchMode::Forced)
            .unwrap();
        assert_eq!(names(&plan), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn diamond_dependencies_are_layered() {
        let nodes = vec![
            node("report", &["api", "ui"]),
            node("api", &["setup"]),
            node("ui", &["setup"]),
            node("setup", &[]),
        ];
        let plan = build_batches(&nodes, BatchMode::Forced).unwrap();
        assert_eq!(
            names(&plan),
            vec![vec!["setup"], vec!["api", "ui"], vec!["report"]]
        );
    }

    #[test]
    fn every_dependency_lands_in_an_earlier_batch() {
        let nodes = vec![
            node("e", &["d", "a"]),
            node("d", &["c"]),
            node("c", &["b"]),
            node("b", &["a"]),
            node("a", &[]),
            node("f", &["a"]),
        ];
        let plan = build_batches(&nodes, BatchMode::Forced).unwrap();
        for n in &nodes {
            let own = plan.batch_of(&n.name).unwrap();
            for dep in &n.depends_on {
                assert!(plan.batch_of(dep).unwrap() < own, "{dep} must precede {}", n.name);
            }
        }
    }

    #[test]
    fn batch_members_sorted_by_priority_then_declaration() {
        let nodes = vec![
            BatchNode::new("low").with_priority(Priority::Low),
            BatchNode::new("medium-1"),
            BatchNode::new("critical").with_priority(Priority::Critical),
            BatchNode::new("medium-2"),
            BatchNode::new("high").with_priority(Priority::High),
        ];
        let plan = build_batches(&nodes, BatchMode::Forced).unwrap();
        assert_eq!(
            names(&plan),
            vec![vec!["critical", "high", "medium-1", "medium-2", "low"]]
        );
    }

    #[test]
    fn cycle_is_forced_into_final_batch() {
        let nodes = vec![
            node("start", &[]),
            node("a", &["b", "start"]),
            node("b", &["a"]),
            node("after", &["a"]),
        ];
        let plan = build_batches(&nodes, BatchMode::Forced).unwrap();
        assert_eq!(names(&plan), vec![vec!["start"], vec!["a", "b", "after"]]);
        assert!(plan.batches[1].forced);

        let error = plan.forced.unwrap();
        assert_eq!(error.unresolved, vec!["a", "b", "after"]);
        assert_eq!(error.cycles, vec![vec!["a".to_string(), "b".to_string()]]);
        assert!(error.dangling.is_empty());
    }

    #[test]
    fn self_dependency_is_reported_as_cycle() {
        let plan = build_batches(&[node("loop", &["loop"])], BatchMode::Forced).unwrap();
        assert_eq!(names(&plan), vec![vec!["loop"]]);
        assert_eq!(plan.forced.unwrap().cycles, vec![vec!["loop".to_string()]]);
    }

    #[test]
    fn dangling_dependency_is_forced_and_reported() {
        let nodes = vec![node("a", &[]), node("b", &["ghost"])];
        let plan = build_batches(&nodes, BatchMode::Forced).unwrap();
        assert_eq!(names(&plan), vec![vec!["a"], vec!["b"]]);
        let error = plan.forced.unwrap();
        assert_eq!(
            error.dangling,
            vec![DanglingDependency {
                workload: "b".into(),
                missing: "ghost".into()
            }]
        );
        assert!(error.to_string().contains("b -> ghost"));
    }

    #[test]
    fn strict_mode_rejects_cycles() {
        let nodes = vec![node("a", &["b"]), node("b", &["a"])];
        let error = build_batches(&nodes, BatchMode::Strict).unwrap_err();
        assert_eq!(error.unresolved, vec!["a", "b"]);
        assert!(error.to_string().contains("cycles"));
    }

    #[test]
    fn duplicates_are_merged_into_one_slot() {
        let nodes = vec![node("a", &[]), node("b", &[]), node("b", &["a"])];
        let plan = build_batches(&nodes, BatchMode::Forced).unwrap();
        assert_eq!(names(&plan), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn nodes_from_plan_unions_dependency_sources() {
        let mut plan = ExecutionPlan::default()
            .with_domain(
                Domain::Functional,
                DomainPlan::new(vec![
                    Workload::new("login"),
                    Workload::new("checkout").depends_on("login"),
                ]),
            )
            .with_domain(
                Domain::Security,
                DomainPlan::new(vec![Workload::new("dast").with_priority(Priority::High)]),
            );
        plan.dependencies
            .insert("dast".into(), vec!["checkout".into()]);
        plan.dependencies
            .insert("gate".into(), vec!["dast".into()]);

        let nodes = nodes_from_plan(&plan);
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["login", "checkout", "dast", "gate"]);
        assert_eq!(nodes[2].depends_on, vec!["checkout"]);
        assert_eq!(nodes[2].priority, Priority::High);

        let batches = build_batches(&nodes, BatchMode::Forced).unwrap();
        assert_eq!(batches.batches.len(), 4);
        assert_eq!(batches.batch_of("gate"), Some(3));
    }
}
