//! Test-only helpers: ledger builders, scratch projects, and a scripted agent.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{Ledger, Priority, Task};
use crate::io::agent::{AgentInvoker, InvocationRequest, InvocationResult, InvokeError};
use crate::io::interrupt::CancelFlag;
use crate::io::ledger_store::load_ledger;
use crate::io::paths::ProjectPaths;
use crate::io::process::ProcessError;

/// Create a task with deterministic defaults.
pub fn task(id: &str, priority: Priority, passes: bool, dependencies: &[&str]) -> Task {
    Task {
        id: id.to_string(),
        description: format!("{id} description"),
        priority,
        category: "functional".to_string(),
        steps: Vec::new(),
        dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
        passes,
    }
}

pub fn ledger(features: Vec<Task>) -> Ledger {
    Ledger::new(features)
}

/// Write `ledger` as pretty JSON, the way the external agent would.
pub fn write_ledger(path: &Path, ledger: &Ledger) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(ledger).context("serialize ledger")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

/// Scratch project directory holding `.agent-harness/feature_list.json`.
pub struct TestProject {
    temp: TempDir,
    paths: ProjectPaths,
}

impl TestProject {
    /// Create `<tmp>/demo` with `ledger` written to its ledger path.
    pub fn new(ledger: &Ledger) -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let paths = ProjectPaths::new(temp.path().join("demo"));
        write_ledger(&paths.ledger_path, ledger)?;
        Ok(Self { temp, paths })
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Directory containing the project (usable as a workspace).
    pub fn workspace(&self) -> &Path {
        self.temp.path()
    }

    pub fn write_ledger(&self, ledger: &Ledger) -> Result<()> {
        write_ledger(&self.paths.ledger_path, ledger)
    }

    pub fn write_raw_ledger(&self, contents: &str) -> Result<()> {
        fs::write(&self.paths.ledger_path, contents)
            .with_context(|| format!("write {}", self.paths.ledger_path.display()))
    }

    pub fn read_ledger(&self) -> Result<Ledger> {
        Ok(load_ledger(&self.paths.ledger_path)?)
    }

    pub fn write_config(&self, contents: &str) -> Result<()> {
        fs::write(&self.paths.config_path, contents)
            .with_context(|| format!("write {}", self.paths.config_path.display()))
    }
}

/// How a scripted invocation ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedEnd {
    Exit(i32),
    Timeout,
    Crash,
    Interrupted,
}

/// One scripted agent run: an optional ledger mutation, then an ending.
#[derive(Debug, Clone)]
pub struct ScriptedInvocation {
    pub end: ScriptedEnd,
    /// Task ids to mark `passes: true` before ending.
    pub complete: Vec<String>,
    pub corrupt_ledger: bool,
}

impl ScriptedInvocation {
    fn ending(end: ScriptedEnd) -> Self {
        Self {
            end,
            complete: Vec::new(),
            corrupt_ledger: false,
        }
    }

    pub fn exit(code: i32) -> Self {
        Self::ending(ScriptedEnd::Exit(code))
    }

    pub fn timeout() -> Self {
        Self::ending(ScriptedEnd::Timeout)
    }

    pub fn crash() -> Self {
        Self::ending(ScriptedEnd::Crash)
    }

    pub fn interrupted() -> Self {
        Self::ending(ScriptedEnd::Interrupted)
    }

    pub fn completing(mut self, id: &str) -> Self {
        self.complete.push(id.to_string());
        self
    }

    pub fn corrupting_ledger(mut self) -> Self {
        self.corrupt_ledger = true;
        self
    }
}

/// Agent double that mutates the ledger instead of spawning a process.
///
/// Once the script is exhausted, every further call exits 0 without changes.
pub struct ScriptedAgent {
    script: RefCell<VecDeque<ScriptedInvocation>>,
    instructions: RefCell<Vec<String>>,
    calls: Cell<usize>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<ScriptedInvocation>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            instructions: RefCell::new(Vec::new()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Instructions received so far, in call order.
    pub fn instructions(&self) -> Vec<String> {
        self.instructions.borrow().clone()
    }

    fn apply(&self, step: &ScriptedInvocation, workdir: &Path) -> Result<()> {
        let ledger_path = ProjectPaths::new(workdir).ledger_path;
        if step.corrupt_ledger {
            fs::write(&ledger_path, "{\"features\": ")
                .with_context(|| format!("corrupt {}", ledger_path.display()))?;
            return Ok(());
        }
        if step.complete.is_empty() {
            return Ok(());
        }
        let mut ledger = load_ledger(&ledger_path)?;
        for id in &step.complete {
            let task = ledger
                .features
                .iter_mut()
                .find(|task| &task.id == id)
                .ok_or_else(|| anyhow!("scripted agent: unknown task {id}"))?;
            task.passes = true;
        }
        write_ledger(&ledger_path, &ledger)
    }
}

impl AgentInvoker for ScriptedAgent {
    fn invoke(
        &self,
        request: &InvocationRequest,
        _cancel: &CancelFlag,
    ) -> Result<InvocationResult, InvokeError> {
        self.calls.set(self.calls.get() + 1);
        self.instructions
            .borrow_mut()
            .push(request.instruction.clone());
        let step = self
            .script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ScriptedInvocation::exit(0));

        if let Err(err) = self.apply(&step, &request.workdir) {
            panic!("scripted agent failed to mutate ledger: {err:#}");
        }

        match step.end {
            ScriptedEnd::Exit(code) => Ok(InvocationResult {
                success: code == 0,
                exit_code: Some(code),
                elapsed_seconds: 0.01,
                stdout_tail: format!("scripted exit {code}"),
                stderr_tail: String::new(),
                artifact: None,
            }),
            ScriptedEnd::Timeout => Err(InvokeError::Timeout {
                limit: request.timeout,
                stdout_tail: "scripted timeout".to_string(),
                stderr_tail: String::new(),
            }),
            ScriptedEnd::Crash => Err(InvokeError::Crash(ProcessError::Spawn {
                program: "scripted-agent".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "vanished"),
            })),
            ScriptedEnd::Interrupted => Err(InvokeError::Interrupted),
        }
    }
}

/// Write an executable `sh` script standing in for the agent CLI.
#[cfg(unix)]
pub fn write_agent_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    let mut perms = fs::metadata(&path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).with_context(|| format!("chmod {}", path.display()))?;
    Ok(path)
}

/// True while a process with `pid` exists and is not a zombie.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        // Field 3 is the state; the command name in field 2 may contain spaces.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

/// Poll `predicate` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate()
}

/// `Command` for the built `harness` binary, run from `cwd`.
pub fn harness_command(bin: &Path, cwd: &Path) -> Command {
    let mut cmd = Command::new(bin);
    cmd.current_dir(cwd).env("RUST_LOG", "off");
    cmd
}
