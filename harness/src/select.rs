//! Selection helpers for `harness status`, `harness run` and `harness loop`.

use anyhow::{Context, Result};

use crate::core::selector::{BlockedTask, Selection, blocked_tasks, select};
use crate::core::types::{Ledger, Task};
use crate::io::ledger_store::load_ledger;
use crate::io::paths::ProjectPaths;

/// Owned selection outcome, detached from the ledger snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectOutcome {
    /// Every task passes (or there are none).
    Complete,
    /// Next task to hand to the agent.
    Eligible(Task),
    /// Work remains but no task is eligible.
    Blocked {
        pending: usize,
        blocked: Vec<BlockedTask>,
    },
}

/// Select the next task from an in-memory ledger.
pub fn select_task(ledger: &Ledger) -> SelectOutcome {
    match select(ledger) {
        Selection::AllComplete => SelectOutcome::Complete,
        Selection::Eligible(task) => SelectOutcome::Eligible(task.clone()),
        Selection::NoneEligible { pending } => SelectOutcome::Blocked {
            pending,
            blocked: blocked_tasks(ledger),
        },
    }
}

/// Load the project's ledger and select the next task.
pub fn select_from_project(paths: &ProjectPaths) -> Result<SelectOutcome> {
    let ledger = load_ledger(&paths.ledger_path).context("load ledger for selection")?;
    Ok(select_task(&ledger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Priority;
    use crate::test_support::{TestProject, ledger, task};

    #[test]
    fn select_returns_owned_task() {
        let ledger = ledger(vec![
            task("T1", Priority::Low, false, &[]),
            task("T2", Priority::High, false, &[]),
        ]);
        match select_task(&ledger) {
            SelectOutcome::Eligible(task) => assert_eq!(task.id, "T2"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn select_reports_blocked_with_reasons() {
        let ledger = ledger(vec![
            task("A", Priority::High, false, &["B"]),
            task("B", Priority::High, false, &["A"]),
        ]);
        match select_task(&ledger) {
            SelectOutcome::Blocked { pending, blocked } => {
                assert_eq!(pending, 2);
                assert_eq!(blocked.len(), 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn select_from_project_reads_disk() {
        let project = TestProject::new(&ledger(vec![task("T1", Priority::High, true, &[])]))
            .expect("project");
        assert_eq!(
            select_from_project(project.paths()).expect("select"),
            SelectOutcome::Complete
        );
    }
}
