//! Side-effecting helpers: filesystem, configuration, and the agent process.

pub mod agent;
pub mod config;
pub mod cycle_log;
pub mod interrupt;
pub mod ledger_store;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod scan;
