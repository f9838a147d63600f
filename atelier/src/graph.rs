//! Task graph validation and layering.
//!
//! A plan is a set of tasks plus directed edges `from → to` ("to depends on
//! from"). Validation rejects empty plans, duplicate or unknown ids, and
//! cycles; layering groups tasks into levels where each level only depends on
//! earlier levels, so a level can run in parallel.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One task as submitted by a caller, before persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanTaskSpec {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub estimated_cost: f64,
    #[serde(default)]
    pub estimated_duration: f64,
}

/// Directed edge: `to` depends on `from`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("no tasks provided")]
    EmptyPlan,
    #[error("duplicate task id '{0}'")]
    DuplicateId(String),
    #[error("task '{0}' in dependency not found")]
    UnknownId(String),
    #[error("cyclic dependency detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Checks ids and acyclicity. Edges listed in `PlanTaskSpec::depends_on` and
/// `edges` are merged; either representation alone is enough.
pub fn validate(tasks: &[PlanTaskSpec], edges: &[Edge]) -> Result<(), GraphError> {
    if tasks.is_empty() {
        return Err(GraphError::EmptyPlan);
    }

    let mut ids = HashSet::new();
    for task in tasks {
        if !ids.insert(task.task_id.as_str()) {
            return Err(GraphError::DuplicateId(task.task_id.clone()));
        }
    }

    for edge in all_edges(tasks, edges) {
        if !ids.contains(edge.from.as_str()) {
            return Err(GraphError::UnknownId(edge.from));
        }
        if !ids.contains(edge.to.as_str()) {
            return Err(GraphError::UnknownId(edge.to));
        }
    }

    detect_cycle(tasks, edges)
}

/// Merged edge view: explicit edges plus one edge per `depends_on` entry.
fn all_edges(tasks: &[PlanTaskSpec], edges: &[Edge]) -> Vec<Edge> {
    let mut out: Vec<Edge> = edges.to_vec();
    for task in tasks {
        for dep in &task.depends_on {
            let edge = Edge {
                from: dep.clone(),
                to: task.task_id.clone(),
            };
            if !out.contains(&edge) {
                out.push(edge);
            }
        }
    }
    out
}

fn adjacency(tasks: &[PlanTaskSpec], edges: &[Edge]) -> HashMap<String, Vec<String>> {
    let mut graph: HashMap<String, Vec<String>> = tasks
        .iter()
        .map(|t| (t.task_id.clone(), Vec::new()))
        .collect();
    for edge in all_edges(tasks, edges) {
        graph.entry(edge.from).or_default().push(edge.to);
    }
    graph
}

/// Iterative DFS with an explicit frame stack; large plans must not overflow
/// the call stack. The recursion stack doubles as the reported cycle path.
fn detect_cycle(tasks: &[PlanTaskSpec], edges: &[Edge]) -> Result<(), GraphError> {
    let graph = adjacency(tasks, edges);
    let mut roots: Vec<&String> = graph.keys().collect();
    roots.sort();

    let mut visited: HashSet<&str> = HashSet::new();

    for root in roots {
        if visited.contains(root.as_str()) {
            continue;
        }
        // Frame: (node, next child index to explore).
        let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
        let mut on_path: HashSet<&str> = HashSet::new();
        on_path.insert(root.as_str());
        visited.insert(root.as_str());

        while let Some(&(node, child_idx)) = stack.last() {
            let children = graph.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if child_idx >= children.len() {
                stack.pop();
                on_path.remove(node);
                continue;
            }
            if let Some(frame) = stack.last_mut() {
                frame.1 += 1;
            }
            let next = children[child_idx].as_str();
            if on_path.contains(next) {
                let mut path: Vec<String> =
                    stack.iter().map(|(n, _)| (*n).to_string()).collect();
                path.push(next.to_string());
                let start = path.iter().position(|n| n == next).unwrap_or(0);
                return Err(GraphError::Cycle(path[start..].to_vec()));
            }
            if visited.insert(next) {
                on_path.insert(next);
                stack.push((next, 0));
            }
        }
    }
    Ok(())
}

/// Kahn-style layered topological sort. Each layer is the set of
/// currently-zero-in-degree tasks, sorted lexicographically so the output is
/// deterministic. Call [`validate`] first; a cyclic graph loses its cycle
/// members here.
pub fn layers(tasks: &[PlanTaskSpec], edges: &[Edge]) -> Vec<Vec<String>> {
    let graph = adjacency(tasks, edges);
    let mut in_degree: HashMap<&str, usize> =
        graph.keys().map(|id| (id.as_str(), 0)).collect();
    for targets in graph.values() {
        for to in targets {
            if let Some(d) = in_degree.get_mut(to.as_str()) {
                *d += 1;
            }
        }
    }

    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    current.sort_unstable();

    let mut out = Vec::new();
    while !current.is_empty() {
        out.push(current.iter().map(|id| id.to_string()).collect());
        let mut next = Vec::new();
        for id in &current {
            for to in graph.get(*id).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(d) = in_degree.get_mut(to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        next.push(to.as_str());
                    }
                }
            }
        }
        next.sort_unstable();
        current = next;
    }
    out
}

pub fn total_cost(tasks: &[PlanTaskSpec]) -> f64 {
    let total: f64 = tasks.iter().map(|t| t.estimated_cost).sum();
    (total * 10_000.0).round() / 10_000.0
}

pub fn total_duration(tasks: &[PlanTaskSpec]) -> f64 {
    let total: f64 = tasks.iter().map(|t| t.estimated_duration).sum();
    (total * 10.0).round() / 10.0
}

pub fn task_by_id<'a>(tasks: &'a [PlanTaskSpec], task_id: &str) -> Option<&'a PlanTaskSpec> {
    tasks.iter().find(|t| t.task_id == task_id)
}

/// Ids this task depends on (`incoming`) or ids depending on it.
pub fn neighbors(
    task_id: &str,
    tasks: &[PlanTaskSpec],
    edges: &[Edge],
    incoming: bool,
) -> Vec<String> {
    all_edges(tasks, edges)
        .into_iter()
        .filter_map(|e| {
            if incoming && e.to == task_id {
                Some(e.from)
            } else if !incoming && e.from == task_id {
                Some(e.to)
            } else {
                None
            }
        })
        .collect()
}
