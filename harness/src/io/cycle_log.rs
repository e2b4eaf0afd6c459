//! Per-cycle records under `.agent-harness/iterations/<run-id>/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;

use crate::core::classifier::CycleStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleRecord {
    pub run_id: String,
    pub iter: u32,
    pub task_id: Option<String>,
    pub status: CycleStatus,
    pub task_completed: bool,
    pub exit_code: Option<i32>,
    pub elapsed_seconds: Option<f64>,
    pub error: Option<String>,
    pub started_at: String,
    pub ended_at: String,
}

#[derive(Debug, Clone)]
pub struct CyclePaths {
    pub dir: PathBuf,
    pub instruction_path: PathBuf,
    pub artifact_path: PathBuf,
    pub agent_log_path: PathBuf,
    pub record_path: PathBuf,
}

impl CyclePaths {
    pub fn new(iterations_dir: &Path, run_id: &str, iter: u32) -> Self {
        let dir = iterations_dir.join(run_id).join(iter.to_string());
        Self {
            instruction_path: dir.join("instruction.md"),
            artifact_path: dir.join("result.json"),
            agent_log_path: dir.join("agent.log"),
            record_path: dir.join("cycle.json"),
            dir,
        }
    }

    pub fn write_instruction(&self, instruction: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cycle dir {}", self.dir.display()))?;
        write_text(&self.instruction_path, instruction)
    }

    pub fn write_agent_log(&self, stdout_tail: &str, stderr_tail: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cycle dir {}", self.dir.display()))?;
        let mut buf = String::new();
        buf.push_str("=== stdout (tail) ===\n");
        buf.push_str(stdout_tail);
        buf.push_str("\n=== stderr (tail) ===\n");
        buf.push_str(stderr_tail);
        buf.push('\n');
        write_text(&self.agent_log_path, &buf)
    }

    pub fn write_record(&self, record: &CycleRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cycle dir {}", self.dir.display()))?;
        let mut buf = serde_json::to_string_pretty(record).context("serialize cycle record")?;
        buf.push('\n');
        write_text(&self.record_path, &buf)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// Current time as RFC 3339 UTC.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Generate a run id not yet used under `iterations_dir`.
pub fn new_run_id(iterations_dir: &Path) -> Result<String> {
    let base = format!("run-{}", Utc::now().format("%Y%m%d_%H%M%S"));
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        if !iterations_dir.join(&id).exists() {
            return Ok(id);
        }
    }
    Err(anyhow!(
        "unable to generate unique run id from base '{base}' (too many existing runs)"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_paths_are_stable() {
        let paths = CyclePaths::new(Path::new("/p/.agent-harness/iterations"), "run-1", 3);

        assert!(paths.dir.ends_with("iterations/run-1/3"));
        assert!(paths.instruction_path.ends_with("instruction.md"));
        assert!(paths.artifact_path.ends_with("result.json"));
        assert!(paths.agent_log_path.ends_with("agent.log"));
        assert!(paths.record_path.ends_with("cycle.json"));
    }

    #[test]
    fn writes_instruction_log_and_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = CyclePaths::new(temp.path(), "run-9", 1);
        let record = CycleRecord {
            run_id: "run-9".to_string(),
            iter: 1,
            task_id: Some("T1".to_string()),
            status: CycleStatus::Failed,
            task_completed: true,
            exit_code: Some(1),
            elapsed_seconds: Some(2.5),
            error: None,
            started_at: timestamp(),
            ended_at: timestamp(),
        };

        paths.write_instruction("do T1").expect("instruction");
        paths.write_agent_log("out", "err").expect("log");
        paths.write_record(&record).expect("record");

        assert_eq!(
            fs::read_to_string(&paths.instruction_path).expect("read"),
            "do T1"
        );
        let log = fs::read_to_string(&paths.agent_log_path).expect("read");
        assert!(log.contains("out") && log.contains("err"));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.record_path).expect("read"))
                .expect("json");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["task_completed"], true);
        assert_eq!(value["task_id"], "T1");
    }

    #[test]
    fn run_id_skips_existing_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = new_run_id(temp.path()).expect("id");
        assert!(first.starts_with("run-"));

        fs::create_dir_all(temp.path().join(&first)).expect("mkdir");
        let second = new_run_id(temp.path()).expect("id");
        assert_ne!(first, second);
    }
}
