//! Error classes used to decide whether a failure is fatal, retried, or terminal.

use serde::Serialize;

use crate::io::agent::InvokeError;
use crate::io::config::ConfigError;
use crate::io::ledger_store::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Missing agent, missing project/ledger, invalid config. Fatal at startup.
    Configuration,
    /// Corrupt ledger or unresolvable dependencies. Waits for an external fix.
    Data,
    /// Agent timed out or could not be run. Retried on the next cycle.
    Invocation,
    /// Anything else. Retried on the next cycle.
    Transient,
    /// Operator interrupt.
    Interrupted,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Data => "data",
            ErrorClass::Invocation => "invocation",
            ErrorClass::Transient => "transient",
            ErrorClass::Interrupted => "interrupted",
        }
    }
}

/// Classify an error by the first typed error found in its chain.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    for cause in err.chain() {
        if let Some(invoke) = cause.downcast_ref::<InvokeError>() {
            return classify_invoke(invoke);
        }
        if let Some(ledger) = cause.downcast_ref::<LedgerError>() {
            return classify_ledger(ledger);
        }
        if cause.is::<ConfigError>() {
            return ErrorClass::Configuration;
        }
    }
    ErrorClass::Transient
}

pub fn classify_invoke(err: &InvokeError) -> ErrorClass {
    match err {
        InvokeError::AgentNotFound { .. } => ErrorClass::Configuration,
        InvokeError::Interrupted => ErrorClass::Interrupted,
        InvokeError::Timeout { .. } | InvokeError::Crash(_) => ErrorClass::Invocation,
    }
}

pub fn classify_ledger(err: &LedgerError) -> ErrorClass {
    match err {
        LedgerError::NotFound { .. } | LedgerError::InvalidSchema(_) => ErrorClass::Configuration,
        LedgerError::Corrupt { .. } => ErrorClass::Data,
        LedgerError::Unreadable { .. } => ErrorClass::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn classifies_through_context_layers() {
        let err = Err::<(), _>(LedgerError::Corrupt {
            path: PathBuf::from("feature_list.json"),
            reason: "bad".to_string(),
        })
        .context("load ledger")
        .context("run cycle")
        .unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Data);
    }

    #[test]
    fn invoke_errors_map_to_classes() {
        let timeout = anyhow::Error::new(InvokeError::Timeout {
            limit: Duration::from_secs(1),
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        });
        assert_eq!(classify(&timeout), ErrorClass::Invocation);
        assert_eq!(
            classify(&anyhow::Error::new(InvokeError::Interrupted)),
            ErrorClass::Interrupted
        );
        assert_eq!(
            classify(&anyhow::Error::new(InvokeError::AgentNotFound {
                program: "iflow".to_string(),
                tried: Vec::new(),
            })),
            ErrorClass::Configuration
        );
    }

    #[test]
    fn untyped_errors_are_transient() {
        assert_eq!(classify(&anyhow!("disk hiccup")), ErrorClass::Transient);
    }
}
