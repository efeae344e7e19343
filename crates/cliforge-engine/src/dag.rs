//! Levelled dependency graph built from a workflow definition.
//!
//! Nodes are created for every step, nested ones included, so ids stay
//! globally unique. Edges come from explicit `depends_on` declarations
//! and from implicit references discovered by scanning string fields
//! for `{id...}` / `{steps.id...}` spans and bare `steps.id` paths in
//! expression positions. Nested steps execute inside their parents, so
//! the execution order only schedules top-level steps; dependencies of
//! nested steps are lifted onto their top-level ancestor.

use crate::workflow::{Step, Workflow};
use cliforge_core::error::WorkflowError;
use once_cell::sync::Lazy;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Roots that never name a step: environment bindings and scopes
const RESERVED_ROOTS: &[&str] = &["flags", "steps", "response", "event"];

static BRACED_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\s*(?:steps\.)?([A-Za-z_][A-Za-z0-9_-]*)\.[^}]*\}").expect("static pattern")
});

static BARE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bsteps\.([A-Za-z_][A-Za-z0-9_-]*)").expect("static pattern"));

#[derive(Debug, Clone)]
pub struct DagNode {
    pub step: Step,
    pub dependencies: BTreeSet<String>,
    pub dependents: BTreeSet<String>,
    pub level: usize,
}

#[derive(Debug, Clone)]
pub struct Dag {
    pub nodes: HashMap<String, DagNode>,
    /// Top-level step ids grouped by level, in declaration order
    pub execution_order: Vec<Vec<String>>,
}

impl Dag {
    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.nodes.get(id).map(|n| n.level)
    }
}

struct WalkedStep {
    step: Step,
    /// Top-level ancestor id (the step itself when top-level)
    ancestor: String,
    /// Loop iterator names visible at this step's position
    iterator_scope: HashSet<String>,
}

/// Parse a workflow into a levelled, cycle-free DAG
pub fn parse(workflow: &Workflow) -> Result<Dag, WorkflowError> {
    let walked = walk_workflow(workflow)?;

    let mut nodes: HashMap<String, DagNode> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for entry in &walked {
        if entry.step.id.is_empty() {
            return Err(WorkflowError::MissingStepId);
        }
        if nodes.contains_key(&entry.step.id) {
            return Err(WorkflowError::DuplicateStepId(entry.step.id.clone()));
        }
        order.push(entry.step.id.clone());
        nodes.insert(
            entry.step.id.clone(),
            DagNode {
                step: entry.step.clone(),
                dependencies: BTreeSet::new(),
                dependents: BTreeSet::new(),
                level: 0,
            },
        );
    }

    let ancestors: HashMap<String, String> = walked
        .iter()
        .map(|entry| (entry.step.id.clone(), entry.ancestor.clone()))
        .collect();

    let mut edges: Vec<(String, String)> = Vec::new();

    // Explicit dependencies.
    for entry in &walked {
        for dependency in &entry.step.depends_on {
            if !nodes.contains_key(dependency) {
                return Err(WorkflowError::UnknownDependency {
                    step: entry.step.id.clone(),
                    dependency: dependency.clone(),
                });
            }
            edges.push((dependency.clone(), entry.step.id.clone()));
        }
    }

    // Implicit dependencies found by reference scanning.
    for entry in &walked {
        for reference in scan_references(&entry.step, &entry.iterator_scope) {
            if reference == entry.step.id {
                // A step mentioning its own outputs is not a self-edge.
                continue;
            }
            if !nodes.contains_key(&reference) {
                return Err(WorkflowError::UnknownReference {
                    step: entry.step.id.clone(),
                    reference,
                });
            }
            edges.push((reference, entry.step.id.clone()));
        }
    }

    // Lift nested-step dependencies onto the top-level ancestor so the
    // schedule waits for them before the enclosing block starts.
    let mut lifted: Vec<(String, String)> = Vec::new();
    for (from, to) in &edges {
        let from_ancestor = ancestors[from].clone();
        let to_ancestor = ancestors[to].clone();
        if from_ancestor != to_ancestor {
            lifted.push((from_ancestor, to_ancestor));
        }
    }
    edges.extend(lifted);

    for (from, to) in &edges {
        nodes.get_mut(to).expect("node exists").dependencies.insert(from.clone());
        nodes.get_mut(from).expect("node exists").dependents.insert(to.clone());
    }

    detect_cycles(&nodes, &order)?;
    assign_levels(&mut nodes, &order);

    let top_level: Vec<String> = workflow.steps.iter().map(|s| s.id.clone()).collect();
    let max_level = top_level
        .iter()
        .filter_map(|id| nodes.get(id).map(|n| n.level))
        .max()
        .unwrap_or(0);
    let mut execution_order = Vec::new();
    for level in 0..=max_level {
        let ids: Vec<String> = top_level
            .iter()
            .filter(|id| nodes.get(*id).is_some_and(|n| n.level == level))
            .cloned()
            .collect();
        if !ids.is_empty() {
            execution_order.push(ids);
        }
    }

    Ok(Dag {
        nodes,
        execution_order,
    })
}

fn walk_workflow(workflow: &Workflow) -> Result<Vec<WalkedStep>, WorkflowError> {
    let mut walked = Vec::new();
    for step in &workflow.steps {
        walk_step(step, &step.id, &HashSet::new(), &mut walked)?;
    }
    Ok(walked)
}

fn walk_step(
    step: &Step,
    ancestor: &str,
    iterator_scope: &HashSet<String>,
    out: &mut Vec<WalkedStep>,
) -> Result<(), WorkflowError> {
    out.push(WalkedStep {
        step: step.clone(),
        ancestor: ancestor.to_string(),
        iterator_scope: iterator_scope.clone(),
    });

    if let Some(conditional) = &step.conditional {
        for nested in conditional.then.iter().chain(conditional.otherwise.iter()) {
            walk_step(nested, ancestor, iterator_scope, out)?;
        }
    }
    if let Some(loop_step) = &step.loop_step {
        let mut inner_scope = iterator_scope.clone();
        inner_scope.insert(loop_step.iterator.clone());
        inner_scope.insert(format!("{}_index", loop_step.iterator));
        for nested in &loop_step.steps {
            walk_step(nested, ancestor, &inner_scope, out)?;
        }
    }
    if let Some(parallel) = &step.parallel {
        for nested in &parallel.steps {
            walk_step(nested, ancestor, iterator_scope, out)?;
        }
    }
    Ok(())
}

/// Step ids referenced from any string field of the step
fn scan_references(step: &Step, iterator_scope: &HashSet<String>) -> BTreeSet<String> {
    let mut references = BTreeSet::new();
    for field in step.string_fields() {
        for capture in BRACED_REFERENCE.captures_iter(field) {
            references.insert(capture[1].to_string());
        }
        for capture in BARE_REFERENCE.captures_iter(field) {
            references.insert(capture[1].to_string());
        }
    }
    references
        .into_iter()
        .filter(|id| !RESERVED_ROOTS.contains(&id.as_str()))
        .filter(|id| !iterator_scope.contains(id))
        .collect()
}

fn detect_cycles(nodes: &HashMap<String, DagNode>, order: &[String]) -> Result<(), WorkflowError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for id in order {
        indices.insert(id.as_str(), graph.add_node(id.as_str()));
    }
    for id in order {
        let node = &nodes[id];
        for dependency in &node.dependencies {
            graph.add_edge(indices[dependency.as_str()], indices[id.as_str()], ());
        }
    }
    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| WorkflowError::CyclicDependency(graph[cycle.node_id()].to_string()))
}

/// Longest path from any root, memoised over the acyclic edge set
fn assign_levels(nodes: &mut HashMap<String, DagNode>, order: &[String]) {
    let mut memo: HashMap<String, usize> = HashMap::new();
    for id in order {
        compute_level(id, nodes, &mut memo);
    }
    for (id, level) in memo {
        if let Some(node) = nodes.get_mut(&id) {
            node.level = level;
        }
    }
}

fn compute_level(id: &str, nodes: &HashMap<String, DagNode>, memo: &mut HashMap<String, usize>) -> usize {
    if let Some(&level) = memo.get(id) {
        return level;
    }
    let dependencies = nodes[id].dependencies.clone();
    let level = if dependencies.is_empty() {
        0
    } else {
        1 + dependencies
            .iter()
            .map(|dep| compute_level(dep, nodes, memo))
            .max()
            .expect("non-empty dependencies")
    };
    memo.insert(id.to_string(), level);
    level
}
