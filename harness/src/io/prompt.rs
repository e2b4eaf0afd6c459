//! Instruction builder for a single task.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::Task;
use crate::io::paths::ProjectPaths;

const INSTRUCTION_TEMPLATE: &str = include_str!("prompts/instruction.md");

/// Project facts rendered into every instruction.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectContext {
    pub name: String,
    /// Ledger path relative to the project root.
    pub ledger_path: String,
    /// Progress record path relative to the project root.
    pub progress_path: String,
}

impl ProjectContext {
    pub fn from_paths(paths: &ProjectPaths) -> Self {
        Self {
            name: paths.name(),
            ledger_path: display_relative(&paths.ledger_relative()),
            progress_path: display_relative(&paths.progress_relative()),
        }
    }
}

fn display_relative(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[derive(Debug, Serialize)]
struct TaskContext<'a> {
    id: &'a str,
    description: &'a str,
    priority: &'static str,
    category: &'a str,
    steps: &'a [String],
}

/// Render the instruction handed to the agent for `task`.
///
/// Pure: the same task and project always render the same text.
pub fn build_instruction(task: &Task, project: &ProjectContext) -> Result<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("instruction", INSTRUCTION_TEMPLATE)
        .context("load instruction template")?;
    let template = env.get_template("instruction")?;
    let rendered = template
        .render(context! {
            project => project.name.as_str(),
            ledger_path => project.ledger_path.as_str(),
            progress_path => project.progress_path.as_str(),
            task => TaskContext {
                id: &task.id,
                description: task.description.trim(),
                priority: task.priority.as_str(),
                category: &task.category,
                steps: &task.steps,
            },
        })
        .with_context(|| format!("render instruction for task {}", task.id))?;
    Ok(rendered)
}
