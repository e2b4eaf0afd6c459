//! Deterministic, pure logic shared by the harness.
//!
//! Core modules must be free of I/O side effects. They operate on ledger
//! snapshots and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod invariants;
pub mod progress;
pub mod selector;
pub mod types;
