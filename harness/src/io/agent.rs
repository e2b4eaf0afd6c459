//! Agent invocation abstraction.
//!
//! The [`AgentInvoker`] trait decouples the supervisor from the external agent
//! executable. Tests use scripted invokers that mutate the ledger directly
//! instead of spawning processes.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{AgentConfig, RunConfig};
use crate::io::interrupt::CancelFlag;
use crate::io::process::{ProcessError, ProcessLimits, Termination, run_supervised};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Working directory of the agent (the project root).
    pub workdir: PathBuf,
    pub instruction: String,
    /// Soft timeout; the invoker adds its grace period on top.
    pub timeout: Duration,
    pub max_turns: u32,
    /// Where the agent may write its structured result.
    pub artifact_path: PathBuf,
}

/// Process-level outcome of an invocation that ran to exit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResult {
    /// Exit code was zero. Says nothing about the task itself.
    pub success: bool,
    pub exit_code: Option<i32>,
    pub elapsed_seconds: f64,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub artifact: Option<Value>,
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("agent executable '{program}' not found on PATH or at {}", display_paths(tried))]
    AgentNotFound { program: String, tried: Vec<PathBuf> },

    #[error("agent timed out after {}s", limit.as_secs())]
    Timeout {
        limit: Duration,
        stdout_tail: String,
        stderr_tail: String,
    },

    #[error("agent invocation crashed")]
    Crash(#[source] ProcessError),

    #[error("agent invocation interrupted")]
    Interrupted,
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no fallback paths".to_string();
    }
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Abstraction over agent backends.
pub trait AgentInvoker {
    /// Run the agent on `request.instruction` and report how the process ended.
    fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: &CancelFlag,
    ) -> Result<InvocationResult, InvokeError>;
}

/// Invoker that spawns the configured agent CLI.
#[derive(Debug, Clone)]
pub struct CliAgent {
    config: AgentConfig,
    executable: Option<PathBuf>,
    grace: Duration,
    stdout_tail_chars: usize,
    stderr_tail_chars: usize,
}

impl CliAgent {
    /// Resolve the agent executable once. A missing agent is reported by
    /// [`CliAgent::ensure_available`] and by every invocation.
    pub fn locate(agent: &AgentConfig, run: &RunConfig) -> Self {
        let executable = find_executable(&agent.program, &agent.search_paths);
        match &executable {
            Some(path) => debug!(path = %path.display(), "located agent executable"),
            None => warn!(program = %agent.program, "agent executable not found"),
        }
        Self {
            config: agent.clone(),
            executable,
            grace: run.grace(),
            stdout_tail_chars: run.stdout_tail_chars,
            stderr_tail_chars: run.stderr_tail_chars,
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    pub fn ensure_available(&self) -> Result<&Path, InvokeError> {
        self.executable().ok_or_else(|| InvokeError::AgentNotFound {
            program: self.config.program.clone(),
            tried: self.config.search_paths.clone(),
        })
    }

    /// Argument vector passed after the executable.
    pub fn args(&self, request: &InvocationRequest) -> Vec<OsString> {
        let cfg = &self.config;
        let mut args: Vec<OsString> = vec![
            cfg.prompt_flag.clone().into(),
            request.instruction.clone().into(),
            cfg.auto_approve_flag.clone().into(),
            format!("{}={}", cfg.max_turns_flag, request.max_turns).into(),
            cfg.output_flag.clone().into(),
            request.artifact_path.clone().into_os_string(),
        ];
        args.extend(cfg.extra_args.iter().map(OsString::from));
        args.retain(|arg| !arg.is_empty());
        args
    }

    fn child_path(&self) -> Option<OsString> {
        let prepend: Vec<PathBuf> = self
            .config
            .path_prepend
            .iter()
            .filter(|dir| dir.is_dir())
            .cloned()
            .collect();
        if prepend.is_empty() {
            return None;
        }
        let current = env::var_os("PATH").unwrap_or_default();
        let dirs = prepend
            .into_iter()
            .chain(env::split_paths(&current))
            .collect::<Vec<_>>();
        match env::join_paths(dirs) {
            Ok(joined) => Some(joined),
            Err(err) => {
                warn!(err = %err, "cannot build agent PATH, inheriting");
                None
            }
        }
    }
}

impl AgentInvoker for CliAgent {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), max_turns = request.max_turns))]
    fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: &CancelFlag,
    ) -> Result<InvocationResult, InvokeError> {
        let executable = self.ensure_available()?;
        info!(workdir = %request.workdir.display(), "starting agent");

        prepare_artifact_path(&request.artifact_path);
        let mut cmd = Command::new(executable);
        cmd.args(self.args(request)).current_dir(&request.workdir);
        if let Some(path) = self.child_path() {
            cmd.env("PATH", path);
        }

        let limit = request.timeout + self.grace;
        let limits = ProcessLimits {
            deadline: limit,
            stdout_tail_chars: self.stdout_tail_chars,
            stderr_tail_chars: self.stderr_tail_chars,
        };
        let output = run_supervised(cmd, &limits, cancel).map_err(InvokeError::Crash)?;

        match output.termination {
            Termination::Cancelled => Err(InvokeError::Interrupted),
            Termination::TimedOut => {
                warn!(limit_secs = limit.as_secs(), "agent timed out");
                Err(InvokeError::Timeout {
                    limit,
                    stdout_tail: output.stdout_tail,
                    stderr_tail: output.stderr_tail,
                })
            }
            Termination::Exited(status) => {
                if !status.success() {
                    warn!(exit_code = ?status.code(), "agent exited with failure");
                }
                Ok(InvocationResult {
                    success: status.success(),
                    exit_code: status.code(),
                    elapsed_seconds: output.elapsed.as_secs_f64(),
                    stdout_tail: output.stdout_tail,
                    stderr_tail: output.stderr_tail,
                    artifact: read_artifact(&request.artifact_path),
                })
            }
        }
    }
}

/// Locate `program` on `PATH`, then at the first usable fallback path.
pub fn find_executable(program: &str, fallbacks: &[PathBuf]) -> Option<PathBuf> {
    if let Ok(path) = which::which(program) {
        return Some(path);
    }
    fallbacks
        .iter()
        .find_map(|candidate| which::which(candidate).ok())
}

fn prepare_artifact_path(path: &Path) {
    if let Some(parent) = path.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        warn!(dir = %parent.display(), err = %err, "cannot create artifact directory");
    }
    if path.exists()
        && let Err(err) = fs::remove_file(path)
    {
        warn!(path = %path.display(), err = %err, "cannot remove stale artifact");
    }
}

/// Parse the agent's result artifact. Missing or malformed artifacts are absent.
pub fn read_artifact(path: &Path) -> Option<Value> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "cannot read agent artifact");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "agent artifact is not valid JSON");
            None
        }
    }
}
