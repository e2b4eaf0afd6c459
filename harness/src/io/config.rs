//! Harness configuration stored under `.agent-harness/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Harness configuration (TOML).
///
/// Edited by humans. Missing fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    pub agent: AgentConfig,
    pub run: RunConfig,
}

/// How the external agent is located and called.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Program name looked up on `PATH`, or a path to the executable.
    pub program: String,
    /// Fallback executables tried in order when `program` is not on `PATH`.
    pub search_paths: Vec<PathBuf>,
    /// Directories prepended to the child's `PATH` when they exist.
    pub path_prepend: Vec<PathBuf>,
    pub prompt_flag: String,
    pub auto_approve_flag: String,
    /// Rendered as `<flag>=<max_turns>`.
    pub max_turns_flag: String,
    pub output_flag: String,
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "iflow".to_string(),
            search_paths: default_search_paths(),
            path_prepend: Vec::new(),
            prompt_flag: "-p".to_string(),
            auto_approve_flag: "--yolo".to_string(),
            max_turns_flag: "--max-turns".to_string(),
            output_flag: "-o".to_string(),
            extra_args: Vec::new(),
        }
    }
}

fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/usr/local/bin/iflow"),
        PathBuf::from("/usr/bin/iflow"),
    ];
    if cfg!(windows)
        && let Some(appdata) = std::env::var_os("APPDATA")
    {
        paths.push(PathBuf::from(appdata).join("npm").join("iflow.cmd"));
    }
    paths
}

/// Timing and budget knobs for cycles and the loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Soft per-invocation timeout handed to the cycle.
    pub timeout_secs: u64,
    /// Extra wall-clock allowance before the process group is killed.
    pub grace_secs: u64,
    pub max_turns: u32,
    /// Sleep between cycles that did not complete a task.
    pub interval_secs: u64,
    /// Sleep after a cycle that completed a task.
    pub completion_pause_secs: u64,
    pub max_iterations: u32,
    pub stdout_tail_chars: usize,
    pub stderr_tail_chars: usize,
    /// Stop the loop on the first blocked cycle instead of waiting.
    pub exit_on_blocked: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            grace_secs: 60,
            max_turns: 50,
            interval_secs: 60,
            completion_pause_secs: 5,
            max_iterations: 100,
            stdout_tail_chars: 2000,
            stderr_tail_chars: 1000,
            exit_on_blocked: false,
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn completion_pause(&self) -> Duration {
        Duration::from_secs(self.completion_pause_secs)
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.agent.program.trim().is_empty() {
            return invalid("agent.program must be non-empty");
        }
        if self.run.timeout_secs == 0 {
            return invalid("run.timeout_secs must be > 0");
        }
        if self.run.grace_secs == 0 {
            return invalid("run.grace_secs must be > 0");
        }
        if self.run.max_turns == 0 {
            return invalid("run.max_turns must be > 0");
        }
        if self.run.max_iterations == 0 {
            return invalid("run.max_iterations must be > 0");
        }
        if self.run.stdout_tail_chars == 0 || self.run.stderr_tail_chars == 0 {
            return invalid("run.stdout_tail_chars and run.stderr_tail_chars must be > 0");
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: HarnessConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}
