//! Deterministic task selection over a ledger snapshot.
//!
//! Policy: dependency-gated, then priority-ordered. Among eligible tasks the
//! lowest [`Priority`](crate::core::types::Priority) wins and ledger order
//! breaks ties.

use std::collections::HashSet;

use serde::Serialize;

use crate::core::types::{Ledger, Task};

/// Result of selecting from one ledger snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection<'a> {
    /// Every task passes, or the ledger is empty.
    AllComplete,
    /// Incomplete tasks remain but none has all dependencies satisfied.
    NoneEligible { pending: usize },
    Eligible(&'a Task),
}

/// Why an incomplete task cannot be selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub id: String,
    /// Dependencies naming ids absent from the ledger.
    pub missing: Vec<String>,
    /// Dependencies present in the ledger but not yet passing.
    pub waiting_on: Vec<String>,
}

/// Pick the next task to hand to the agent.
pub fn select(ledger: &Ledger) -> Selection<'_> {
    let pending = ledger.pending_count();
    if pending == 0 {
        return Selection::AllComplete;
    }

    let completed = completed_ids(ledger);
    // `min_by_key` keeps the first of equal minima, which preserves ledger order.
    match ledger
        .features
        .iter()
        .filter(|task| is_eligible(task, &completed))
        .min_by_key(|task| task.priority)
    {
        Some(task) => Selection::Eligible(task),
        None => Selection::NoneEligible { pending },
    }
}

/// True if `task` is incomplete and every dependency is a passing task.
pub fn is_eligible(task: &Task, completed: &HashSet<&str>) -> bool {
    !task.passes
        && task
            .dependencies
            .iter()
            .all(|dep| completed.contains(dep.as_str()))
}

/// Ids of tasks with `passes == true`.
///
/// With duplicate ids, one passing copy satisfies every dependent even while
/// another copy is pending. `validate` reports the duplicate.
pub fn completed_ids(ledger: &Ledger) -> HashSet<&str> {
    ledger
        .features
        .iter()
        .filter(|task| task.passes)
        .map(|task| task.id.as_str())
        .collect()
}

/// Explain every incomplete task that is not eligible, in ledger order.
pub fn blocked_tasks(ledger: &Ledger) -> Vec<BlockedTask> {
    let completed = completed_ids(ledger);
    let known: HashSet<&str> = ledger.features.iter().map(|task| task.id.as_str()).collect();

    ledger
        .features
        .iter()
        .filter(|task| !task.passes && !is_eligible(task, &completed))
        .map(|task| {
            let (missing, waiting_on): (Vec<String>, Vec<String>) = task
                .dependencies
                .iter()
                .filter(|dep| !completed.contains(dep.as_str()))
                .cloned()
                .partition(|dep| !known.contains(dep.as_str()));
            BlockedTask {
                id: task.id.clone(),
                missing,
                waiting_on,
            }
        })
        .collect()
}
