//! Ledger load helpers with schema validation.
//!
//! The harness only ever reads the ledger; the external agent is its writer.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use jsonschema::validator_for;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::core::types::Ledger;

const LEDGER_SCHEMA: &str = include_str!("../../schemas/ledger.schema.json");

#[derive(Debug, Error)]
pub enum LedgerError {
    /// No ledger at any of the paths tried.
    #[error("ledger not found (tried {})", display_paths(tried))]
    NotFound { tried: Vec<PathBuf> },

    /// The ledger exists but does not match the expected schema.
    #[error("ledger {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("read ledger {}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ledger schema: {0}")]
    InvalidSchema(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate a ledger snapshot from disk.
pub fn load_ledger(path: &Path) -> Result<Ledger, LedgerError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(LedgerError::NotFound {
                tried: vec![path.to_path_buf()],
            });
        }
        Err(source) => {
            return Err(LedgerError::Unreadable {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    parse_ledger(path, &contents)
}

/// Parse ledger JSON, reporting every schema violation at once.
pub fn parse_ledger(path: &Path, contents: &str) -> Result<Ledger, LedgerError> {
    let corrupt = |reason: String| LedgerError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value = serde_json::from_str(contents).map_err(|err| corrupt(err.to_string()))?;
    validate_schema(&value).map_err(|errors| match errors {
        SchemaCheck::Violations(messages) => corrupt(messages.join("; ")),
        SchemaCheck::Invalid(message) => LedgerError::InvalidSchema(message),
    })?;
    let ledger: Ledger = serde_json::from_value(value).map_err(|err| corrupt(err.to_string()))?;
    debug!(
        path = %path.display(),
        tasks = ledger.features.len(),
        completed = ledger.completed_count(),
        "ledger loaded"
    );
    Ok(ledger)
}

enum SchemaCheck {
    Violations(Vec<String>),
    Invalid(String),
}

fn validate_schema(instance: &Value) -> Result<(), SchemaCheck> {
    let schema: Value =
        serde_json::from_str(LEDGER_SCHEMA).map_err(|err| SchemaCheck::Invalid(err.to_string()))?;
    let validator = validator_for(&schema).map_err(|err| SchemaCheck::Invalid(err.to_string()))?;
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| {
            let location = err.instance_path().to_string();
            if location.is_empty() {
                err.to_string()
            } else {
                format!("{location}: {err}")
            }
        })
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(SchemaCheck::Violations(messages))
    }
}
