//! Canonical paths of a harness project and project resolution.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::io::ledger_store::LedgerError;

/// Directory holding the ledger and harness records inside a project.
pub const HARNESS_DIR: &str = ".agent-harness";
pub const LEDGER_FILE: &str = "feature_list.json";
pub const PROGRESS_FILE: &str = "claude-progress.txt";
pub const CONFIG_FILE: &str = "config.toml";

/// All canonical paths within `.agent-harness/` for a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub harness_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub progress_path: PathBuf,
    pub config_path: PathBuf,
    pub iterations_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let harness_dir = root.join(HARNESS_DIR);
        Self {
            root: root.clone(),
            ledger_path: harness_dir.join(LEDGER_FILE),
            progress_path: harness_dir.join(PROGRESS_FILE),
            config_path: harness_dir.join(CONFIG_FILE),
            iterations_dir: harness_dir.join("iterations"),
            harness_dir,
        }
    }

    /// Directory name used to refer to the project in instructions and reports.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string())
    }

    /// Ledger path relative to the project root (`.agent-harness/feature_list.json`).
    pub fn ledger_relative(&self) -> PathBuf {
        Path::new(HARNESS_DIR).join(LEDGER_FILE)
    }

    /// Progress path relative to the project root.
    pub fn progress_relative(&self) -> PathBuf {
        Path::new(HARNESS_DIR).join(PROGRESS_FILE)
    }

    pub fn has_ledger(&self) -> bool {
        self.ledger_path.is_file()
    }
}

/// Candidate project roots for `project`, in resolution order.
///
/// Absolute paths are taken as-is. Relative names are tried under the
/// workspace and then next to it (the workspace's parent directory).
pub fn candidate_roots(workspace: &Path, project: &Path) -> Vec<PathBuf> {
    if project.is_absolute() {
        return vec![project.to_path_buf()];
    }
    let mut candidates = vec![workspace.join(project)];
    if let Some(parent) = workspace.parent() {
        candidates.push(parent.join(project));
    }
    candidates
}

/// Resolve a project name or path to the first candidate that holds a ledger.
pub fn resolve_project(workspace: &Path, project: &Path) -> Result<ProjectPaths, LedgerError> {
    let candidates = candidate_roots(workspace, project);
    for root in &candidates {
        let paths = ProjectPaths::new(root);
        if paths.has_ledger() {
            debug!(root = %paths.root.display(), "resolved project");
            return Ok(paths);
        }
    }
    Err(LedgerError::NotFound {
        tried: candidates
            .into_iter()
            .map(|root| ProjectPaths::new(root).ledger_path)
            .collect(),
    })
}
