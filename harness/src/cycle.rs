//! Orchestration for a single supervised cycle (`harness run`).
//!
//! A cycle selects on a fresh ledger read, hands the selected task to the
//! agent, then re-reads the ledger to decide whether the task was completed.
//! Completion is inferred from the ledger only, never from the exit code.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{CycleStatus, task_completed};
use crate::core::progress::{LedgerSummary, TaskBrief, summarize};
use crate::core::selector::BlockedTask;
use crate::core::types::{Ledger, Task};
use crate::error::{ErrorClass, classify_invoke, classify_ledger};
use crate::io::agent::{AgentInvoker, InvocationRequest, InvocationResult, InvokeError};
use crate::io::cycle_log::{CyclePaths, CycleRecord, timestamp};
use crate::io::interrupt::CancelFlag;
use crate::io::ledger_store::{LedgerError, load_ledger};
use crate::io::paths::ProjectPaths;
use crate::io::prompt::{ProjectContext, build_instruction};
use crate::select::{SelectOutcome, select_task};

/// Identity and budgets of one cycle.
#[derive(Debug, Clone)]
pub struct CycleRequest<'a> {
    pub project: &'a ProjectPaths,
    pub run_id: &'a str,
    /// 1-indexed position within the run.
    pub iter: u32,
    pub timeout: Duration,
    pub max_turns: u32,
}

/// Result of one supervised cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub run_id: String,
    pub iter: u32,
    pub status: CycleStatus,
    /// Task handed to the agent, if any.
    pub task: Option<TaskBrief>,
    /// Ledger-derived: the selected task no longer needs work.
    pub task_completed: bool,
    pub invocation: Option<InvocationResult>,
    pub error: Option<String>,
    pub error_class: Option<ErrorClass>,
    /// Why nothing could be selected (only for `Blocked`).
    pub blocked: Vec<BlockedTask>,
    /// Summary of the freshest ledger read, when it was readable.
    pub summary: Option<LedgerSummary>,
}

impl CycleOutcome {
    fn without_task(request: &CycleRequest<'_>, status: CycleStatus) -> Self {
        Self {
            run_id: request.run_id.to_string(),
            iter: request.iter,
            status,
            task: None,
            task_completed: false,
            invocation: None,
            error: None,
            error_class: None,
            blocked: Vec::new(),
            summary: None,
        }
    }

    /// True when the freshest ledger read has no work left.
    pub fn all_complete(&self) -> bool {
        self.status == CycleStatus::Completed
            || self.summary.as_ref().is_some_and(LedgerSummary::is_complete)
    }
}

/// Run one cycle against `request.project`.
///
/// Returns `Err` only for failures the cycle cannot report on its own:
/// an operator interrupt, a missing agent, or an unreadable/missing ledger at
/// the start of the cycle. Invocation timeouts and crashes are `Failed`
/// outcomes.
#[instrument(skip_all, fields(run_id = request.run_id, iter = request.iter))]
pub fn run_cycle<A: AgentInvoker>(
    request: &CycleRequest<'_>,
    agent: &A,
    cancel: &CancelFlag,
) -> Result<CycleOutcome> {
    let before = match load_ledger(&request.project.ledger_path) {
        Ok(ledger) => ledger,
        Err(err @ LedgerError::Corrupt { .. }) => {
            warn!(err = %err, "ledger is corrupt, cycle blocked");
            let mut outcome = CycleOutcome::without_task(request, CycleStatus::Blocked);
            outcome.error_class = Some(classify_ledger(&err));
            outcome.error = Some(err.to_string());
            return Ok(outcome);
        }
        Err(err) => return Err(err).context("load ledger before invocation"),
    };

    let task = match select_task(&before) {
        SelectOutcome::Complete => {
            info!("all tasks complete");
            let mut outcome = CycleOutcome::without_task(request, CycleStatus::Completed);
            outcome.summary = Some(summarize(&before));
            return Ok(outcome);
        }
        SelectOutcome::Blocked { pending, blocked } => {
            warn!(pending, "no eligible task, cycle blocked");
            let mut outcome = CycleOutcome::without_task(request, CycleStatus::Blocked);
            outcome.error_class = Some(ErrorClass::Data);
            outcome.blocked = blocked;
            outcome.summary = Some(summarize(&before));
            return Ok(outcome);
        }
        SelectOutcome::Eligible(task) => task,
    };
    info!(task_id = %task.id, priority = task.priority.as_str(), "selected task");

    let instruction = build_instruction(&task, &ProjectContext::from_paths(request.project))?;
    let cycle_paths = CyclePaths::new(&request.project.iterations_dir, request.run_id, request.iter);
    if let Err(err) = cycle_paths.write_instruction(&instruction) {
        warn!(err = %format!("{err:#}"), "failed to write instruction record");
    }

    let started_at = timestamp();
    let invocation = agent.invoke(
        &InvocationRequest {
            workdir: request.project.root.clone(),
            instruction,
            timeout: request.timeout,
            max_turns: request.max_turns,
            artifact_path: cycle_paths.artifact_path.clone(),
        },
        cancel,
    );

    let mut outcome = CycleOutcome::without_task(request, CycleStatus::Failed);
    outcome.task = Some(brief(&task));
    match invocation {
        Ok(result) => {
            outcome.status = CycleStatus::from_invocation(result.success);
            write_agent_log(&cycle_paths, &result.stdout_tail, &result.stderr_tail);
            outcome.invocation = Some(result);
        }
        Err(
            ref err @ InvokeError::Timeout {
                ref stdout_tail,
                ref stderr_tail,
                ..
            },
        ) => {
            write_agent_log(&cycle_paths, stdout_tail, stderr_tail);
            outcome.error_class = Some(classify_invoke(err));
            outcome.error = Some(err.to_string());
        }
        Err(err @ InvokeError::Crash(_)) => {
            outcome.error_class = Some(classify_invoke(&err));
            outcome.error = Some(format!("{:#}", anyhow::Error::new(err)));
        }
        Err(err) => {
            outcome.error = Some(err.to_string());
            write_record(&cycle_paths, &outcome, &started_at);
            return Err(err).with_context(|| format!("invoke agent for task {}", task.id));
        }
    }

    // The agent may have finished the work even if the process failed.
    match load_ledger(&request.project.ledger_path) {
        Ok(after) => {
            outcome.task_completed = task_completed(&task.id, &after);
            outcome.summary = Some(summarize(&after));
            log_completion(&task, &after, outcome.task_completed);
        }
        Err(err) => {
            warn!(err = %err, "ledger re-read failed, task not considered completed");
            let message = format!("ledger re-read failed: {err}");
            outcome.error = Some(match outcome.error.take() {
                Some(previous) => format!("{previous}; {message}"),
                None => message,
            });
            if outcome.error_class.is_none() {
                outcome.error_class = Some(classify_ledger(&err));
            }
        }
    }

    write_record(&cycle_paths, &outcome, &started_at);
    Ok(outcome)
}

fn brief(task: &Task) -> TaskBrief {
    TaskBrief {
        id: task.id.clone(),
        description: task.description.clone(),
        priority: task.priority,
    }
}

fn log_completion(task: &Task, after: &Ledger, completed: bool) {
    let passes = after.find(&task.id).is_some_and(|t| t.passes);
    if completed {
        info!(task_id = %task.id, passes, "task completed");
    } else {
        debug!(task_id = %task.id, passes, "task not completed");
    }
}

fn write_agent_log(paths: &CyclePaths, stdout_tail: &str, stderr_tail: &str) {
    if let Err(err) = paths.write_agent_log(stdout_tail, stderr_tail) {
        warn!(err = %format!("{err:#}"), "failed to write agent log");
    }
}

fn write_record(paths: &CyclePaths, outcome: &CycleOutcome, started_at: &str) {
    let invocation = outcome.invocation.as_ref();
    let record = CycleRecord {
        run_id: outcome.run_id.clone(),
        iter: outcome.iter,
        task_id: outcome.task.as_ref().map(|task| task.id.clone()),
        status: outcome.status,
        task_completed: outcome.task_completed,
        exit_code: invocation.and_then(|result| result.exit_code),
        elapsed_seconds: invocation.map(|result| result.elapsed_seconds),
        error: outcome.error.clone(),
        started_at: started_at.to_string(),
        ended_at: timestamp(),
    };
    if let Err(err) = paths.write_record(&record) {
        warn!(err = %format!("{err:#}"), "failed to write cycle record");
    }
}
