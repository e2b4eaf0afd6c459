//! Discover harness projects next to the workspace.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::paths::ProjectPaths;

const SKIPPED_DIRS: [&str; 2] = ["node_modules", "__pycache__"];

/// Projects among the immediate sub-directories of `workspace` and its parent.
///
/// A project is a directory holding `.agent-harness/feature_list.json`.
/// Results are absolute, de-duplicated and sorted. Scan roots that do not
/// exist are skipped; a root that exists but cannot be listed is an error.
pub fn scan_projects(workspace: &Path) -> Result<Vec<ProjectPaths>> {
    let mut roots = vec![workspace.to_path_buf()];
    if let Some(parent) = workspace.parent() {
        roots.push(parent.to_path_buf());
    }

    let mut found = BTreeSet::new();
    let mut scanned = BTreeSet::new();
    for root in roots {
        if !root.is_dir() || !scanned.insert(absolute(&root)) {
            continue;
        }
        let entries =
            fs::read_dir(&root).with_context(|| format!("read directory {}", root.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", root.display()))?;
            let path = entry.path();
            if !path.is_dir() || is_skipped(&path) {
                continue;
            }
            if ProjectPaths::new(&path).has_ledger() {
                found.insert(absolute(&path));
            }
        }
    }

    debug!(count = found.len(), "scanned projects");
    Ok(found.into_iter().map(ProjectPaths::new).collect())
}

fn is_skipped(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return true;
    };
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::paths::{HARNESS_DIR, LEDGER_FILE};

    fn make_project(dir: &Path) {
        fs::create_dir_all(dir.join(HARNESS_DIR)).expect("mkdir");
        fs::write(dir.join(HARNESS_DIR).join(LEDGER_FILE), "{\"features\":[]}").expect("write");
    }

    #[test]
    fn finds_projects_in_workspace_and_parent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = temp.path().join("tools");
        fs::create_dir_all(&workspace).expect("mkdir");
        make_project(&workspace.join("api"));
        make_project(&temp.path().join("blog"));
        make_project(&temp.path().join(".hidden"));
        make_project(&temp.path().join("node_modules"));
        fs::create_dir_all(temp.path().join("plain")).expect("mkdir");

        let projects = scan_projects(&workspace).expect("scan");
        let names: Vec<String> = projects.iter().map(ProjectPaths::name).collect();
        assert_eq!(names.len(), 2, "{names:?}");
        assert!(names.contains(&"api".to_string()));
        assert!(names.contains(&"blog".to_string()));
        assert!(projects.iter().all(|p| p.root.is_absolute()));
    }

    #[test]
    fn missing_workspace_scans_parent_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        make_project(&temp.path().join("blog"));

        let projects = scan_projects(&temp.path().join("gone")).expect("scan");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name(), "blog");
    }
}
