//! Stable exit codes for harness CLI commands.

/// All work complete, or an informational command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration, missing agent/project/ledger, or another fatal error.
pub const INVALID: i32 = 1;
/// Work remains but the process stopped (interrupt, iteration cap, single cycle).
pub const INCOMPLETE: i32 = 2;
/// Incomplete tasks remain but none is eligible.
pub const BLOCKED: i32 = 3;
