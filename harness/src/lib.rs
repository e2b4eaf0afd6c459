//! Task-ledger driven agent harness.
//!
//! The harness repeatedly hands one eligible task from a project's ledger
//! (`.agent-harness/feature_list.json`) to an external, non-interactive coding
//! agent and decides from the re-read ledger whether the task was completed.
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (selection, invariants, cycle
//!   classification, progress summaries). No I/O.
//! - **[`io`]**: Side-effecting operations (ledger and config files, the agent
//!   process, cycle records, interrupts).
//!
//! Orchestration modules ([`select`], [`cycle`], [`looping`]) combine the two
//! to implement the CLI commands.

pub mod core;
pub mod cycle;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod select;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
