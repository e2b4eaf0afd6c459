//! Shared cancellation flag set by SIGINT/SIGTERM.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::warn;

/// Granularity at which sleeps and process waits observe cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cloneable handle to one cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `false` when the sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Install a process-wide SIGINT/SIGTERM handler that sets this flag.
    ///
    /// Can only be called once per process.
    pub fn install(&self) -> Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            warn!("interrupt received, stopping");
            flag.cancel();
        })
        .context("install interrupt handler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_runs_to_completion_when_not_cancelled() {
        let flag = CancelFlag::new();
        assert!(flag.sleep(Duration::from_millis(10)));
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let flag = CancelFlag::new();
        let remote = flag.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let start = Instant::now();
        assert!(!flag.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().expect("join");
    }
}
