//! Continuous mode for `harness loop`.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::classifier::CycleStatus;
use crate::cycle::{CycleOutcome, CycleRequest, run_cycle};
use crate::error::{ErrorClass, classify};
use crate::io::agent::AgentInvoker;
use crate::io::config::RunConfig;
use crate::io::cycle_log::new_run_id;
use crate::io::interrupt::CancelFlag;
use crate::io::paths::ProjectPaths;

/// Timing and budgets for one loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub timeout: Duration,
    pub max_turns: u32,
    /// Sleep after a cycle that did not complete its task.
    pub interval: Duration,
    /// Sleep after a cycle that completed its task.
    pub completion_pause: Duration,
    pub max_iterations: u32,
    pub exit_on_blocked: bool,
}

impl LoopConfig {
    pub fn from_run(run: &RunConfig) -> Self {
        Self {
            timeout: run.timeout(),
            max_turns: run.max_turns,
            interval: run.interval(),
            completion_pause: run.completion_pause(),
            max_iterations: run.max_iterations,
            exit_on_blocked: run.exit_on_blocked,
        }
    }
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// Every task passes.
    Completed,
    /// Nothing was eligible and `exit_on_blocked` is set.
    Blocked,
    /// SIGINT/SIGTERM observed.
    Interrupted,
    MaxIterationsReached { max_iterations: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub run_id: String,
    /// Cycles executed.
    pub iterations: u32,
    /// Cycles whose task was completed.
    pub completed_tasks: u32,
    pub stop: LoopStop,
}

/// Progress notifications emitted while looping.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    Cycle(&'a CycleOutcome),
    CycleError {
        iter: u32,
        class: ErrorClass,
        error: &'a anyhow::Error,
    },
    Sleeping(Duration),
}

/// Run cycles until all work is done, the operator interrupts, the loop is
/// blocked with `exit_on_blocked`, or `max_iterations` cycles have run.
///
/// Cycle errors other than an interrupt are reported through `on_event` and
/// retried after `interval`.
pub fn run_loop<A: AgentInvoker, F: FnMut(LoopEvent<'_>)>(
    project: &ProjectPaths,
    agent: &A,
    config: &LoopConfig,
    cancel: &CancelFlag,
    mut on_event: F,
) -> Result<LoopOutcome> {
    let run_id = new_run_id(&project.iterations_dir)?;
    info!(run_id = %run_id, project = %project.root.display(), "loop started");

    let mut outcome = LoopOutcome {
        run_id: run_id.clone(),
        iterations: 0,
        completed_tasks: 0,
        stop: LoopStop::MaxIterationsReached {
            max_iterations: config.max_iterations,
        },
    };

    for iter in 1..=config.max_iterations {
        if cancel.is_cancelled() {
            outcome.stop = LoopStop::Interrupted;
            return Ok(outcome);
        }

        let request = CycleRequest {
            project,
            run_id: &run_id,
            iter,
            timeout: config.timeout,
            max_turns: config.max_turns,
        };
        let result = run_cycle(&request, agent, cancel);
        outcome.iterations = iter;

        let pause = match result {
            Ok(cycle) => {
                on_event(LoopEvent::Cycle(&cycle));
                match cycle.status {
                    CycleStatus::Completed => {
                        outcome.stop = LoopStop::Completed;
                        return Ok(outcome);
                    }
                    CycleStatus::Blocked if config.exit_on_blocked => {
                        outcome.stop = LoopStop::Blocked;
                        return Ok(outcome);
                    }
                    _ => {}
                }
                if cycle.task_completed {
                    outcome.completed_tasks += 1;
                    if cycle.all_complete() {
                        outcome.stop = LoopStop::Completed;
                        return Ok(outcome);
                    }
                    config.completion_pause
                } else {
                    config.interval
                }
            }
            Err(err) => {
                let class = classify(&err);
                if class == ErrorClass::Interrupted {
                    outcome.stop = LoopStop::Interrupted;
                    return Ok(outcome);
                }
                warn!(iter, class = class.as_str(), err = %format!("{err:#}"), "cycle failed, retrying");
                on_event(LoopEvent::CycleError {
                    iter,
                    class,
                    error: &err,
                });
                config.interval
            }
        };

        if iter == config.max_iterations {
            break;
        }
        on_event(LoopEvent::Sleeping(pause));
        if !cancel.sleep(pause) {
            outcome.stop = LoopStop::Interrupted;
            return Ok(outcome);
        }
    }

    info!(iterations = outcome.iterations, "max iterations reached");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Priority;
    use crate::test_support::{ScriptedAgent, ScriptedInvocation, TestProject, ledger, task};

    fn fast_config(max_iterations: u32) -> LoopConfig {
        LoopConfig {
            timeout: Duration::from_secs(5),
            max_turns: 3,
            interval: Duration::ZERO,
            completion_pause: Duration::ZERO,
            max_iterations,
            exit_on_blocked: false,
        }
    }

    #[test]
    fn loop_stops_at_exactly_max_iterations() {
        let project =
            TestProject::new(&ledger(vec![task("T1", Priority::High, false, &[])])).expect("project");
        let agent = ScriptedAgent::new(Vec::new());
        let mut sleeps = 0;

        let outcome = run_loop(
            project.paths(),
            &agent,
            &fast_config(3),
            &CancelFlag::new(),
            |event| {
                if matches!(event, LoopEvent::Sleeping(_)) {
                    sleeps += 1;
                }
            },
        )
        .expect("loop");

        assert_eq!(outcome.iterations, 3);
        assert_eq!(agent.calls(), 3);
        assert_eq!(sleeps, 2);
        assert_eq!(
            outcome.stop,
            LoopStop::MaxIterationsReached { max_iterations: 3 }
        );
    }

    #[test]
    fn loop_completes_after_last_task() {
        let project = TestProject::new(&ledger(vec![
            task("T1", Priority::High, false, &[]),
            task("T2", Priority::High, false, &["T1"]),
        ]))
        .expect("project");
        let agent = ScriptedAgent::new(vec![
            ScriptedInvocation::exit(0).completing("T1"),
            ScriptedInvocation::exit(0).completing("T2"),
        ]);

        let outcome = run_loop(
            project.paths(),
            &agent,
            &fast_config(10),
            &CancelFlag::new(),
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.completed_tasks, 2);
        assert_eq!(outcome.iterations, 2);
    }

    #[test]
    fn blocked_loop_exits_only_when_configured() {
        let project =
            TestProject::new(&ledger(vec![task("A", Priority::High, false, &["ghost"])]))
                .expect("project");
        let agent = ScriptedAgent::new(Vec::new());

        let waiting = run_loop(
            project.paths(),
            &agent,
            &fast_config(2),
            &CancelFlag::new(),
            |_| {},
        )
        .expect("loop");
        assert_eq!(
            waiting.stop,
            LoopStop::MaxIterationsReached { max_iterations: 2 }
        );

        let config = LoopConfig {
            exit_on_blocked: true,
            ..fast_config(5)
        };
        let exited = run_loop(project.paths(), &agent, &config, &CancelFlag::new(), |_| {})
            .expect("loop");
        assert_eq!(exited.stop, LoopStop::Blocked);
        assert_eq!(exited.iterations, 1);
        assert_eq!(agent.calls(), 0);
    }

    #[test]
    fn interrupt_during_invocation_stops_the_loop() {
        let project =
            TestProject::new(&ledger(vec![task("T1", Priority::High, false, &[])])).expect("project");
        let agent = ScriptedAgent::new(vec![ScriptedInvocation::interrupted()]);

        let outcome = run_loop(
            project.paths(),
            &agent,
            &fast_config(10),
            &CancelFlag::new(),
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::Interrupted);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn cancelled_flag_stops_before_first_cycle() {
        let project =
            TestProject::new(&ledger(vec![task("T1", Priority::High, false, &[])])).expect("project");
        let agent = ScriptedAgent::new(Vec::new());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome =
            run_loop(project.paths(), &agent, &fast_config(10), &cancel, |_| {}).expect("loop");

        assert_eq!(outcome.stop, LoopStop::Interrupted);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(agent.calls(), 0);
    }

    #[test]
    fn missing_ledger_errors_are_reported_and_retried() {
        let project =
            TestProject::new(&ledger(vec![task("T1", Priority::High, false, &[])])).expect("project");
        std::fs::remove_file(&project.paths().ledger_path).expect("remove ledger");
        let agent = ScriptedAgent::new(Vec::new());
        let mut errors = Vec::new();

        let outcome = run_loop(
            project.paths(),
            &agent,
            &fast_config(3),
            &CancelFlag::new(),
            |event| {
                if let LoopEvent::CycleError { iter, class, .. } = event {
                    errors.push((iter, class));
                }
            },
        )
        .expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::MaxIterationsReached { max_iterations: 3 }
        );
        assert_eq!(
            errors,
            vec![
                (1, ErrorClass::Configuration),
                (2, ErrorClass::Configuration),
                (3, ErrorClass::Configuration),
            ]
        );
        assert_eq!(agent.calls(), 0);
    }

    #[test]
    fn loop_recovers_once_ledger_is_restored() {
        let original = ledger(vec![task("T1", Priority::High, false, &[])]);
        let project = TestProject::new(&original).expect("project");
        std::fs::remove_file(&project.paths().ledger_path).expect("remove ledger");
        let agent = ScriptedAgent::new(vec![ScriptedInvocation::exit(0).completing("T1")]);
        let mut failed_iters = Vec::new();

        let outcome = run_loop(
            project.paths(),
            &agent,
            &fast_config(5),
            &CancelFlag::new(),
            |event| {
                if let LoopEvent::CycleError { iter, .. } = event {
                    failed_iters.push(iter);
                    project.write_ledger(&original).expect("restore ledger");
                }
            },
        )
        .expect("loop");

        assert_eq!(failed_iters, vec![1]);
        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.completed_tasks, 1);
    }

    #[test]
    fn cycle_errors_are_retried() {
        let project =
            TestProject::new(&ledger(vec![task("T1", Priority::High, false, &[])])).expect("project");
        let agent = ScriptedAgent::new(vec![
            ScriptedInvocation::crash(),
            ScriptedInvocation::exit(0).completing("T1"),
        ]);
        let mut statuses = Vec::new();

        let outcome = run_loop(
            project.paths(),
            &agent,
            &fast_config(5),
            &CancelFlag::new(),
            |event| {
                if let LoopEvent::Cycle(cycle) = event {
                    statuses.push(cycle.status);
                }
            },
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(statuses, vec![CycleStatus::Failed, CycleStatus::Succeeded]);
    }
}
