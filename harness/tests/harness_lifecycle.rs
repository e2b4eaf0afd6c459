//! Lifecycle tests driving cycles and the loop across several iterations.
//!
//! The scripted agent stands in for the external CLI and mutates the ledger the
//! way a real agent would, so these tests cover selection, supervision, and
//! loop termination end to end without spawning processes.

use std::fs;
use std::time::Duration;

use harness::core::classifier::CycleStatus;
use harness::core::types::Priority;
use harness::cycle::{CycleRequest, run_cycle};
use harness::io::cycle_log::CyclePaths;
use harness::io::interrupt::CancelFlag;
use harness::looping::{LoopConfig, LoopEvent, LoopStop, run_loop};
use harness::select::{SelectOutcome, select_from_project};
use harness::test_support::{ScriptedAgent, ScriptedInvocation, TestProject, ledger, task};

fn request<'a>(project: &'a TestProject, iter: u32) -> CycleRequest<'a> {
    CycleRequest {
        project: project.paths(),
        run_id: "run-lifecycle",
        iter,
        timeout: Duration::from_secs(5),
        max_turns: 10,
    }
}

/// T1, then T2 (depends on T1): the second cycle picks T2 once the agent marks T1.
#[test]
fn dependent_task_follows_once_agent_marks_first() {
    let project = TestProject::new(&ledger(vec![
        task("T1", Priority::High, false, &[]),
        task("T2", Priority::High, false, &["T1"]),
    ]))
    .expect("project");
    let agent = ScriptedAgent::new(vec![
        ScriptedInvocation::exit(0).completing("T1"),
        ScriptedInvocation::exit(0).completing("T2"),
    ]);
    let cancel = CancelFlag::new();

    let first = run_cycle(&request(&project, 1), &agent, &cancel).expect("cycle 1");
    assert_eq!(first.task.as_ref().map(|t| t.id.as_str()), Some("T1"));
    assert!(first.task_completed);

    match select_from_project(project.paths()).expect("select") {
        SelectOutcome::Eligible(task) => assert_eq!(task.id, "T2"),
        other => panic!("expected T2 to be eligible, got {other:?}"),
    }

    let second = run_cycle(&request(&project, 2), &agent, &cancel).expect("cycle 2");
    assert_eq!(second.task.as_ref().map(|t| t.id.as_str()), Some("T2"));
    assert!(second.all_complete());

    let third = run_cycle(&request(&project, 3), &agent, &cancel).expect("cycle 3");
    assert_eq!(third.status, CycleStatus::Completed);
    assert_eq!(agent.calls(), 2);

    let instructions = agent.instructions();
    assert!(instructions[0].contains("- ID: T1"));
    assert!(instructions[1].contains("- ID: T2"));
}

/// The ledger, not the exit code, decides completion.
#[test]
fn completion_is_independent_of_exit_code() {
    let project = TestProject::new(&ledger(vec![
        task("T1", Priority::Medium, false, &[]),
        task("T2", Priority::Low, false, &[]),
    ]))
    .expect("project");
    let agent = ScriptedAgent::new(vec![
        ScriptedInvocation::exit(2).completing("T1"),
        ScriptedInvocation::exit(0),
    ]);
    let cancel = CancelFlag::new();

    let failed = run_cycle(&request(&project, 1), &agent, &cancel).expect("cycle 1");
    assert_eq!(failed.status, CycleStatus::Failed);
    assert!(failed.task_completed);

    let unchanged = run_cycle(&request(&project, 2), &agent, &cancel).expect("cycle 2");
    assert_eq!(unchanged.status, CycleStatus::Succeeded);
    assert!(!unchanged.task_completed);
    assert_eq!(unchanged.task.as_ref().map(|t| t.id.as_str()), Some("T2"));
}

/// Cycle records land under `.agent-harness/iterations/<run>/<n>/`.
#[test]
fn cycle_record_reflects_outcome() {
    let project =
        TestProject::new(&ledger(vec![task("T1", Priority::High, false, &[])])).expect("project");
    let agent = ScriptedAgent::new(vec![ScriptedInvocation::timeout()]);

    let outcome = run_cycle(&request(&project, 1), &agent, &CancelFlag::new()).expect("cycle");
    assert_eq!(outcome.status, CycleStatus::Failed);

    let paths = CyclePaths::new(&project.paths().iterations_dir, "run-lifecycle", 1);
    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&paths.record_path).expect("read record"))
            .expect("parse record");
    assert_eq!(record["task_id"], "T1");
    assert_eq!(record["status"], "failed");
    assert_eq!(record["task_completed"], false);
    assert!(
        record["error"]
            .as_str()
            .is_some_and(|err| err.contains("timed out"))
    );
}

/// A loop that never completes its task stops at the iteration cap.
#[test]
fn loop_without_progress_stops_at_cap() {
    let project =
        TestProject::new(&ledger(vec![task("T1", Priority::High, false, &[])])).expect("project");
    let agent = ScriptedAgent::new(Vec::new());
    let config = LoopConfig {
        timeout: Duration::from_secs(5),
        max_turns: 10,
        interval: Duration::ZERO,
        completion_pause: Duration::ZERO,
        max_iterations: 4,
        exit_on_blocked: false,
    };
    let mut cycles = 0;

    let outcome = run_loop(
        project.paths(),
        &agent,
        &config,
        &CancelFlag::new(),
        |event| {
            if let LoopEvent::Cycle(_) = event {
                cycles += 1;
            }
        },
    )
    .expect("loop");

    assert_eq!(
        outcome.stop,
        LoopStop::MaxIterationsReached { max_iterations: 4 }
    );
    assert_eq!(outcome.iterations, 4);
    assert_eq!(outcome.completed_tasks, 0);
    assert_eq!(cycles, 4);
}

/// A ledger fixed externally while the loop waits unblocks the run.
#[test]
fn corrupt_ledger_blocks_until_repaired() {
    let project =
        TestProject::new(&ledger(vec![task("T1", Priority::High, false, &[])])).expect("project");
    project.write_raw_ledger("{ broken").expect("corrupt");
    let agent = ScriptedAgent::new(vec![ScriptedInvocation::exit(0).completing("T1")]);
    let config = LoopConfig {
        timeout: Duration::from_secs(5),
        max_turns: 10,
        interval: Duration::ZERO,
        completion_pause: Duration::ZERO,
        max_iterations: 5,
        exit_on_blocked: false,
    };
    let repaired = ledger(vec![task("T1", Priority::High, false, &[])]);
    let mut statuses = Vec::new();

    let outcome = run_loop(
        project.paths(),
        &agent,
        &config,
        &CancelFlag::new(),
        |event| match event {
            LoopEvent::Cycle(cycle) => statuses.push(cycle.status),
            LoopEvent::Sleeping(_) if statuses.len() == 1 => {
                project.write_ledger(&repaired).expect("repair ledger");
            }
            _ => {}
        },
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Completed);
    assert_eq!(statuses, vec![CycleStatus::Blocked, CycleStatus::Succeeded]);
}
