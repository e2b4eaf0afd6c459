//! Deterministic classification of a finished cycle.

use serde::{Deserialize, Serialize};

use crate::core::selector::{Selection, select};
use crate::core::types::Ledger;

/// Status of one supervised cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// Nothing left to do. Terminal for the whole run.
    Completed,
    /// Work remains but nothing is eligible, or the ledger is unreadable.
    Blocked,
    /// The agent process exited with code 0.
    Succeeded,
    /// The agent process exited non-zero, timed out, or failed to spawn.
    Failed,
}

impl CycleStatus {
    pub fn from_invocation(success: bool) -> Self {
        if success {
            CycleStatus::Succeeded
        } else {
            CycleStatus::Failed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::Completed => "completed",
            CycleStatus::Blocked => "blocked",
            CycleStatus::Succeeded => "succeeded",
            CycleStatus::Failed => "failed",
        }
    }
}

/// Infer whether the task selected before the invocation is now done.
///
/// Only ledger state counts: the task is done when nothing is left, or when
/// reselection no longer picks it. The agent's exit code plays no part.
pub fn task_completed(selected_id: &str, after: &Ledger) -> bool {
    match select(after) {
        Selection::AllComplete => true,
        Selection::Eligible(task) => task.id != selected_id,
        // No reselection to compare against; fall back to the task's own flag.
        Selection::NoneEligible { .. } => after
            .find(selected_id)
            .is_some_and(|task| task.passes),
    }
}
