//! Progress summaries for `harness status` and `harness scan`.

use serde::Serialize;

use crate::core::selector::{BlockedTask, Selection, blocked_tasks, select};
use crate::core::types::{Ledger, Priority};

/// Short description of the next eligible task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskBrief {
    pub id: String,
    pub description: String,
    pub priority: Priority,
}

/// Counts and next-task view of one ledger snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub percent: usize,
    pub next_task: Option<TaskBrief>,
    /// Incomplete tasks that cannot be selected. Only filled when nothing is eligible.
    pub blocked: Vec<BlockedTask>,
}

impl LedgerSummary {
    /// `3/5 (60%)`.
    pub fn progress(&self) -> String {
        format!("{}/{} ({}%)", self.completed, self.total, self.percent)
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }

    pub fn is_blocked(&self) -> bool {
        self.pending > 0 && self.next_task.is_none()
    }
}

pub fn summarize(ledger: &Ledger) -> LedgerSummary {
    let total = ledger.features.len();
    let completed = ledger.completed_count();
    let percent = if total == 0 { 0 } else { completed * 100 / total };

    let (next_task, blocked) = match select(ledger) {
        Selection::Eligible(task) => (
            Some(TaskBrief {
                id: task.id.clone(),
                description: task.description.clone(),
                priority: task.priority,
            }),
            Vec::new(),
        ),
        Selection::NoneEligible { .. } => (None, blocked_tasks(ledger)),
        Selection::AllComplete => (None, Vec::new()),
    };

    LedgerSummary {
        total,
        completed,
        pending: total - completed,
        percent,
        next_task,
        blocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ledger, task};

    #[test]
    fn summary_counts_and_next_task() {
        let ledger = ledger(vec![
            task("a", Priority::High, true, &[]),
            task("b", Priority::Low, false, &["a"]),
            task("c", Priority::Medium, false, &["b"]),
        ]);

        let summary = summarize(&ledger);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 2);
        assert_eq!(summary.progress(), "1/3 (33%)");
        assert_eq!(summary.next_task.as_ref().map(|t| t.id.as_str()), Some("b"));
        assert!(summary.blocked.is_empty());
        assert!(!summary.is_blocked());
    }

    #[test]
    fn empty_ledger_is_complete_at_zero_percent() {
        let summary = summarize(&Ledger::default());
        assert!(summary.is_complete());
        assert_eq!(summary.progress(), "0/0 (0%)");
    }

    #[test]
    fn blocked_summary_lists_reasons() {
        let ledger = ledger(vec![task("a", Priority::High, false, &["ghost"])]);

        let summary = summarize(&ledger);
        assert!(summary.is_blocked());
        assert_eq!(summary.blocked.len(), 1);
        assert_eq!(summary.blocked[0].missing, vec!["ghost".to_string()]);
    }
}
