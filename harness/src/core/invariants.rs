//! Ledger data-quality checks not expressible via JSON Schema.
//!
//! Violations are reported, never enforced: selection stays total over any
//! ledger that parses.

use std::collections::{HashMap, HashSet};

use crate::core::types::Ledger;

/// Check ledger invariants in ledger order:
/// - ids are non-empty and unique
/// - no task depends on itself
/// - every dependency names a task in the ledger
/// - dependencies form no cycle
pub fn validate_invariants(ledger: &Ledger) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let known: HashSet<&str> = ledger.features.iter().map(|t| t.id.as_str()).collect();

    for (index, task) in ledger.features.iter().enumerate() {
        if task.id.trim().is_empty() {
            errors.push(format!("features[{index}]: id must not be empty"));
        }
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate id '{}' at features[{index}]", task.id));
        }
        for dep in &task.dependencies {
            if dep == &task.id {
                errors.push(format!("{}: depends on itself", task.id));
            } else if !known.contains(dep.as_str()) {
                errors.push(format!("{}: unknown dependency '{}'", task.id, dep));
            }
        }
    }

    if let Some(cycle) = find_cycle(ledger) {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    errors
}

/// Depth-first search for a dependency cycle, returned as a closed path.
///
/// Self-dependencies are reported separately and skipped here.
pub fn find_cycle(ledger: &Ledger) -> Option<Vec<String>> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in &ledger.features {
        let deps = edges.entry(task.id.as_str()).or_default();
        deps.extend(
            task.dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| *dep != task.id),
        );
    }

    let mut visited = HashSet::new();
    for task in &ledger.features {
        let start = task.id.as_str();
        if !visited.insert(start) {
            continue;
        }
        if let Some(cycle) = walk(start, &edges, &mut visited) {
            return Some(cycle.into_iter().map(str::to_string).collect());
        }
    }
    None
}

/// Iterative DFS from `start`; the path stack keeps deep chains off the call stack.
fn walk<'a>(
    start: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
) -> Option<Vec<&'a str>> {
    // Each entry is a node on the current path and the index of its next edge.
    let mut path: Vec<(&'a str, usize)> = vec![(start, 0)];
    let mut on_path: HashSet<&'a str> = HashSet::from([start]);

    while let Some(&(node, next)) = path.last() {
        let deps = edges.get(node).map(Vec::as_slice).unwrap_or_default();
        let Some(&dep) = deps.get(next) else {
            on_path.remove(node);
            path.pop();
            continue;
        };
        if let Some(top) = path.last_mut() {
            top.1 += 1;
        }

        if on_path.contains(dep) {
            // Keep only the cycle itself, closed on its first node.
            let pos = path.iter().position(|(entry, _)| *entry == dep)?;
            let mut cycle: Vec<&'a str> = path[pos..].iter().map(|(entry, _)| *entry).collect();
            cycle.push(dep);
            return Some(cycle);
        }
        if edges.contains_key(dep) && visited.insert(dep) {
            on_path.insert(dep);
            path.push((dep, 0));
        }
    }
    None
}
