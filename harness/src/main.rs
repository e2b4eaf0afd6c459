//! Task-ledger agent harness CLI.
//!
//! Finds a project's `.agent-harness/feature_list.json`, reports progress, and
//! drives an external coding agent through the ledger one task per cycle.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use harness::core::classifier::CycleStatus;
use harness::core::invariants::validate_invariants;
use harness::core::progress::{LedgerSummary, summarize};
use harness::cycle::{CycleOutcome, CycleRequest, run_cycle};
use harness::error::{ErrorClass, classify};
use harness::exit_codes;
use harness::io::agent::CliAgent;
use harness::io::config::{ConfigError, HarnessConfig, load_config};
use harness::io::cycle_log::new_run_id;
use harness::io::interrupt::CancelFlag;
use harness::io::ledger_store::load_ledger;
use harness::io::paths::{ProjectPaths, resolve_project};
use harness::io::scan::scan_projects;
use harness::logging;
use harness::looping::{LoopConfig, LoopEvent, LoopOutcome, LoopStop, run_loop};

#[derive(Parser)]
#[command(
    name = "harness",
    version,
    about = "Drive an external coding agent through a task ledger"
)]
struct Cli {
    /// Directory to resolve and scan projects from (default: current directory).
    #[arg(long, global = true, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Config file (default: `<project>/.agent-harness/config.toml`).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List projects in the workspace and its parent directory.
    Scan,
    /// Show completed/pending counts and the next eligible task.
    Status {
        #[command(flatten)]
        project: ProjectArg,
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check the ledger for duplicate ids, unknown dependencies and cycles.
    Validate {
        #[command(flatten)]
        project: ProjectArg,
    },
    /// Run a single supervised cycle and print its outcome as JSON.
    Run {
        #[command(flatten)]
        project: ProjectArg,
        #[command(flatten)]
        budget: BudgetArgs,
    },
    /// Run cycles until all tasks pass, an interrupt, or the iteration cap.
    Loop {
        #[command(flatten)]
        project: ProjectArg,
        #[command(flatten)]
        budget: BudgetArgs,
        /// Seconds to wait after a cycle that did not complete its task.
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
        #[arg(long, value_name = "N")]
        max_iterations: Option<u32>,
        /// Stop instead of waiting when no task is eligible.
        #[arg(long)]
        exit_on_blocked: bool,
    },
}

#[derive(Args)]
struct ProjectArg {
    /// Project name or path (default: first scanned project).
    #[arg(long, value_name = "PROJECT")]
    project: Option<PathBuf>,
}

#[derive(Args)]
struct BudgetArgs {
    /// Per-invocation timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Turn budget passed to the agent.
    #[arg(long, value_name = "N")]
    max_turns: Option<u32>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let workspace = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let config = cli.config.as_deref();
    match cli.command {
        Command::Scan => cmd_scan(&workspace),
        Command::Status { project, json } => {
            cmd_status(&resolve(&workspace, project.project.as_deref())?, json)
        }
        Command::Validate { project } => {
            cmd_validate(&resolve(&workspace, project.project.as_deref())?)
        }
        Command::Run { project, budget } => {
            let paths = resolve(&workspace, project.project.as_deref())?;
            let mut cfg = load_project_config(&paths, config)?;
            budget.apply(&mut cfg);
            cfg.validate()?;
            cmd_run(&paths, &cfg)
        }
        Command::Loop {
            project,
            budget,
            interval,
            max_iterations,
            exit_on_blocked,
        } => {
            let paths = resolve(&workspace, project.project.as_deref())?;
            let mut cfg = load_project_config(&paths, config)?;
            budget.apply(&mut cfg);
            if let Some(interval) = interval {
                cfg.run.interval_secs = interval;
            }
            if let Some(max_iterations) = max_iterations {
                cfg.run.max_iterations = max_iterations;
            }
            cfg.run.exit_on_blocked |= exit_on_blocked;
            cfg.validate()?;
            cmd_loop(&paths, &cfg)
        }
    }
}

impl BudgetArgs {
    fn apply(&self, cfg: &mut HarnessConfig) {
        if let Some(timeout) = self.timeout {
            cfg.run.timeout_secs = timeout;
        }
        if let Some(max_turns) = self.max_turns {
            cfg.run.max_turns = max_turns;
        }
    }
}

/// Resolve `--project`, or fall back to the first scanned project.
fn resolve(workspace: &Path, project: Option<&Path>) -> Result<ProjectPaths> {
    match project {
        Some(project) => Ok(resolve_project(workspace, project)?),
        None => scan_projects(workspace)?.into_iter().next().ok_or_else(|| {
            anyhow!(
                "no project with .agent-harness/feature_list.json under {} or its parent; pass --project",
                workspace.display()
            )
        }),
    }
}

fn load_project_config(paths: &ProjectPaths, explicit: Option<&Path>) -> Result<HarnessConfig> {
    let path = match explicit {
        Some(path) if !path.exists() => {
            return Err(ConfigError::Invalid(format!(
                "config file {} does not exist",
                path.display()
            ))
            .into());
        }
        Some(path) => path,
        None => paths.config_path.as_path(),
    };
    Ok(load_config(path)?)
}

/// Locate the agent once and fail fast when it is missing.
fn locate_agent(cfg: &HarnessConfig) -> Result<CliAgent> {
    let agent = CliAgent::locate(&cfg.agent, &cfg.run);
    agent.ensure_available()?;
    Ok(agent)
}

fn cmd_scan(workspace: &Path) -> Result<i32> {
    let projects = scan_projects(workspace)?;
    if projects.is_empty() {
        println!("no projects found");
        return Ok(exit_codes::OK);
    }
    for project in projects {
        match load_ledger(&project.ledger_path) {
            Ok(ledger) => println!(
                "{}\t{}\t{}",
                project.name(),
                summarize(&ledger).progress(),
                project.root.display()
            ),
            Err(err) => println!(
                "{}\tunreadable ({err})\t{}",
                project.name(),
                project.root.display()
            ),
        }
    }
    Ok(exit_codes::OK)
}

#[derive(Serialize)]
struct StatusReport<'a> {
    project: String,
    root: &'a Path,
    #[serde(flatten)]
    summary: &'a LedgerSummary,
}

fn cmd_status(paths: &ProjectPaths, json: bool) -> Result<i32> {
    let ledger = load_ledger(&paths.ledger_path)?;
    let summary = summarize(&ledger);
    if json {
        let report = StatusReport {
            project: paths.name(),
            root: &paths.root,
            summary: &summary,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize status")?
        );
    } else {
        print_status(paths, &summary);
    }
    Ok(if summary.is_blocked() {
        exit_codes::BLOCKED
    } else {
        exit_codes::OK
    })
}

fn print_status(paths: &ProjectPaths, summary: &LedgerSummary) {
    println!("project:  {} ({})", paths.name(), paths.root.display());
    println!("progress: {}", summary.progress());
    println!("pending:  {}", summary.pending);
    match &summary.next_task {
        Some(task) => println!(
            "next:     {} [{}] {}",
            task.id,
            task.priority.as_str(),
            task.description
        ),
        None if summary.is_complete() => println!("next:     none (all tasks complete)"),
        None => println!("next:     none (blocked)"),
    }
    for blocked in &summary.blocked {
        let mut reasons = Vec::new();
        if !blocked.missing.is_empty() {
            reasons.push(format!("unknown dependencies {}", blocked.missing.join(", ")));
        }
        if !blocked.waiting_on.is_empty() {
            reasons.push(format!("waiting on {}", blocked.waiting_on.join(", ")));
        }
        println!("blocked:  {}: {}", blocked.id, reasons.join("; "));
    }
}

fn cmd_validate(paths: &ProjectPaths) -> Result<i32> {
    let ledger = load_ledger(&paths.ledger_path)?;
    let issues = validate_invariants(&ledger);
    if issues.is_empty() {
        println!("ok: {} tasks", ledger.features.len());
        return Ok(exit_codes::OK);
    }
    for issue in &issues {
        println!("- {issue}");
    }
    Ok(exit_codes::INVALID)
}

fn cmd_run(paths: &ProjectPaths, cfg: &HarnessConfig) -> Result<i32> {
    let agent = locate_agent(cfg)?;
    let cancel = CancelFlag::new();
    cancel.install()?;

    let run_id = new_run_id(&paths.iterations_dir)?;
    let request = CycleRequest {
        project: paths,
        run_id: &run_id,
        iter: 1,
        timeout: cfg.run.timeout(),
        max_turns: cfg.run.max_turns,
    };
    let outcome = match run_cycle(&request, &agent, &cancel) {
        Ok(outcome) => outcome,
        Err(err) if classify(&err) == ErrorClass::Interrupted => {
            eprintln!("interrupted");
            return Ok(exit_codes::INCOMPLETE);
        }
        Err(err) => return Err(err),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("serialize cycle outcome")?
    );
    Ok(match outcome.status {
        CycleStatus::Blocked => exit_codes::BLOCKED,
        _ if outcome.all_complete() => exit_codes::OK,
        _ => exit_codes::INCOMPLETE,
    })
}

fn cmd_loop(paths: &ProjectPaths, cfg: &HarnessConfig) -> Result<i32> {
    let agent = locate_agent(cfg)?;
    let cancel = CancelFlag::new();
    cancel.install()?;

    let config = LoopConfig::from_run(&cfg.run);
    println!(
        "loop: project {} (max {} iterations, interval {}s)",
        paths.name(),
        config.max_iterations,
        config.interval.as_secs()
    );
    let outcome = run_loop(paths, &agent, &config, &cancel, print_event)?;
    print_loop_outcome(&outcome);
    Ok(match outcome.stop {
        LoopStop::Completed => exit_codes::OK,
        LoopStop::Blocked => exit_codes::BLOCKED,
        LoopStop::Interrupted | LoopStop::MaxIterationsReached { .. } => exit_codes::INCOMPLETE,
    })
}

fn print_event(event: LoopEvent<'_>) {
    match event {
        LoopEvent::Cycle(cycle) => println!("{}", describe_cycle(cycle)),
        LoopEvent::CycleError { iter, class, error } => {
            println!("[{iter}] {} error: {error:#}", class.as_str());
        }
        LoopEvent::Sleeping(pause) => println!("    waiting {}s", pause.as_secs()),
    }
    let _ = std::io::stdout().flush();
}

fn describe_cycle(cycle: &CycleOutcome) -> String {
    let progress = cycle
        .summary
        .as_ref()
        .map(|summary| format!(" progress {}", summary.progress()))
        .unwrap_or_default();
    match (&cycle.task, cycle.status) {
        (_, CycleStatus::Completed) => format!("[{}] all tasks complete{progress}", cycle.iter),
        (_, CycleStatus::Blocked) => {
            let reason = cycle.error.clone().unwrap_or_else(|| {
                let ids: Vec<&str> = cycle.blocked.iter().map(|b| b.id.as_str()).collect();
                format!("no eligible task ({})", ids.join(", "))
            });
            format!("[{}] blocked: {reason}{progress}", cycle.iter)
        }
        (Some(task), status) => {
            let mut line = format!(
                "[{}] {} {}: completed={}{progress}",
                cycle.iter,
                task.id,
                status.as_str(),
                cycle.task_completed
            );
            if let Some(error) = &cycle.error {
                line.push_str(&format!(" ({error})"));
            }
            line
        }
        (None, status) => format!("[{}] {}{progress}", cycle.iter, status.as_str()),
    }
}

fn print_loop_outcome(outcome: &LoopOutcome) {
    let reason = match outcome.stop {
        LoopStop::Completed => "all tasks complete".to_string(),
        LoopStop::Blocked => "blocked".to_string(),
        LoopStop::Interrupted => "interrupted".to_string(),
        LoopStop::MaxIterationsReached { max_iterations } => {
            format!("reached max iterations ({max_iterations})")
        }
    };
    println!(
        "loop {}: {reason} after {} iterations, {} tasks completed",
        outcome.run_id, outcome.iterations, outcome.completed_tasks
    );
}
