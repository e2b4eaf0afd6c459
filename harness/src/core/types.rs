//! Ledger data model shared by selection, reporting and the supervisor.
//!
//! The ledger is owned by the external agent. These types are read-only views
//! of one snapshot; nothing in the crate writes `passes` back to disk.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Task priority. Declaration order is the selection rank (`High` first).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// One declared unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_category")]
    pub category: String,
    /// Ordered, rendered verbatim into the instruction.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Ids that must have `passes == true` before this task is eligible.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Completion flag. Written only by the external agent.
    #[serde(default)]
    pub passes: bool,
}

fn default_category() -> String {
    "functional".to_string()
}

/// Snapshot of `.agent-harness/feature_list.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub features: Vec<Task>,
    /// Free-form metadata kept by external collaborators (`project_spec`, counters, ...).
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Ledger {
    pub fn new(features: Vec<Task>) -> Self {
        Self {
            features,
            metadata: Map::new(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.features.iter().find(|task| task.id == id)
    }

    pub fn completed_count(&self) -> usize {
        self.features.iter().filter(|task| task.passes).count()
    }

    pub fn pending_count(&self) -> usize {
        self.features.len() - self.completed_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_ledger_defaults() {
        let raw = r#"{"features":[{"id":"T1"}],"project_spec":"blog"}"#;
        let ledger: Ledger = serde_json::from_str(raw).expect("parse");

        let task = &ledger.features[0];
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.category, "functional");
        assert!(task.steps.is_empty());
        assert!(task.dependencies.is_empty());
        assert!(!task.passes);
        assert_eq!(
            ledger.metadata.get("project_spec"),
            Some(&Value::String("blog".to_string()))
        );
    }

    #[test]
    fn priority_ranks_high_before_low() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
    }
}
