//! Dependency ordering for development tasks

use std::collections::{BTreeMap, BTreeSet};
use workflow_types::{ProposalTask, TaskDependency};
use crate::error::{WorkflowError, Result};

/// Order task ids so every edge's `from` precedes its `to`.
///
/// Edges come from the proposal's edge list and from each task's own
/// `dependencies`. Ready tasks are taken in ascending id order, so the same
/// graph always yields the same order. Edges naming unknown tasks are ignored.
pub fn execution_order(tasks: &[ProposalTask], edges: &[TaskDependency]) -> Result<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
    let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    let declared = tasks
        .iter()
        .flat_map(|t| t.dependencies.iter().map(move |dep| (dep.as_str(), t.id.as_str())));
    let listed = edges.iter().map(|e| (e.from.as_str(), e.to.as_str()));

    for (from, to) in listed.chain(declared) {
        if !in_degree.contains_key(from) || !in_degree.contains_key(to) {
            log::warn!("Ignoring dependency {} -> {} on unknown task", from, to);
            continue;
        }
        // duplicate edges would double count in-degree
        if adjacency.entry(from).or_default().insert(to) {
            if let Some(degree) = in_degree.get_mut(to) {
                *degree += 1;
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        if let Some(successors) = adjacency.get(id) {
            for successor in successors {
                if let Some(degree) = in_degree.get_mut(successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*successor);
                    }
                }
            }
        }
    }

    if order.len() < in_degree.len() {
        let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let unresolved: Vec<String> = in_degree
            .keys()
            .filter(|id| !placed.contains(*id))
            .map(|id| id.to_string())
            .collect();
        log::error!("Dependency cycle detected among tasks: {:?}", unresolved);
        return Err(WorkflowError::DependencyCycle(unresolved));
    }

    Ok(order)
}
