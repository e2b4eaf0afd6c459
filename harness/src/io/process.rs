//! Run a child process in its own process group with a hard deadline,
//! cooperative cancellation, and bounded tails of its output.

use std::collections::VecDeque;
use std::io::Read;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::interrupt::{CancelFlag, POLL_INTERVAL};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wait for child process")]
    Wait(#[source] std::io::Error),

    #[error("child output pipes were not captured")]
    MissingPipes,
}

/// How long output readers may keep draining once the child is gone.
///
/// A process that left the group (`setsid`) can hold the pipes open forever;
/// its readers are detached when the window closes.
pub const OUTPUT_DRAIN_WINDOW: Duration = Duration::from_secs(1);

/// Limits applied to one supervised run.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    /// Hard wall-clock limit; the process group is killed when it expires.
    pub deadline: Duration,
    pub stdout_tail_chars: usize,
    pub stderr_tail_chars: usize,
}

/// How the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub termination: Termination,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(status) => status.code(),
            Termination::TimedOut | Termination::Cancelled => None,
        }
    }
}

/// Run `cmd` until it exits, the deadline passes, or `cancel` is set.
///
/// Stdout and stderr are drained concurrently into ring buffers so the child
/// never blocks on a full pipe. Whatever the outcome, the child's process
/// group is killed before returning so no descendant outlives the call.
/// Readers get [`OUTPUT_DRAIN_WINDOW`] after that to finish, so the call
/// returns within `deadline` plus the window even if an escaped process keeps
/// the pipes open.
#[instrument(skip_all, fields(deadline_secs = limits.deadline.as_secs()))]
pub fn run_supervised(
    mut cmd: Command,
    limits: &ProcessLimits,
    cancel: &CancelFlag,
) -> Result<ProcessOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(%program, "spawning child process");
    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| {
        error!(%program, err = %source, "failed to spawn command");
        ProcessError::Spawn { program, source }
    })?;

    let (stdout, stderr) = take_pipes(&mut child)?;
    let (done_tx, done_rx) = mpsc::channel();
    let stdout_tail = spawn_reader(
        stdout,
        tail_byte_capacity(limits.stdout_tail_chars),
        done_tx.clone(),
    );
    let stderr_tail = spawn_reader(
        stderr,
        tail_byte_capacity(limits.stderr_tail_chars),
        done_tx,
    );

    let termination = match wait_with_deadline(&mut child, start + limits.deadline, cancel) {
        Ok(termination) => termination,
        Err(err) => {
            kill_process_group(&mut child);
            let _ = child.wait();
            return Err(err);
        }
    };
    if matches!(termination, Termination::Exited(_)) {
        // Descendants may still hold the pipes open.
        kill_process_group(&mut child);
    }

    await_readers(&done_rx, 2, OUTPUT_DRAIN_WINDOW);
    let stdout = stdout_tail.text();
    let stderr = stderr_tail.text();
    let elapsed = start.elapsed();

    debug!(?termination, elapsed_secs = elapsed.as_secs_f64(), "command finished");
    Ok(ProcessOutput {
        termination,
        stdout_tail: tail_chars(&stdout, limits.stdout_tail_chars),
        stderr_tail: tail_chars(&stderr, limits.stderr_tail_chars),
        elapsed,
    })
}

fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
    cancel: &CancelFlag,
) -> Result<Termination, ProcessError> {
    loop {
        if cancel.is_cancelled() {
            warn!("cancellation requested, killing process group");
            kill_process_group(child);
            child.wait().map_err(ProcessError::Wait)?;
            return Ok(Termination::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("deadline exceeded, killing process group");
            kill_process_group(child);
            child.wait().map_err(ProcessError::Wait)?;
            return Ok(Termination::TimedOut);
        }
        if let Some(status) = child
            .wait_timeout(POLL_INTERVAL.min(remaining))
            .map_err(ProcessError::Wait)?
        {
            return Ok(Termination::Exited(status));
        }
    }
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            warn!(err = %err, "killpg failed, killing child only");
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

/// Worst-case UTF-8 size of `chars` characters.
fn tail_byte_capacity(chars: usize) -> usize {
    chars.saturating_mul(4).max(1)
}

/// Bounded byte ring keeping the most recent `cap` bytes of a stream.
#[derive(Debug)]
struct TailBuffer {
    bytes: VecDeque<u8>,
    cap: usize,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(cap.min(64 * 1024)),
            cap,
        }
    }

    fn push(&mut self, data: &[u8]) {
        let data = if data.len() > self.cap {
            &data[data.len() - self.cap..]
        } else {
            data
        };
        let overflow = (self.bytes.len() + data.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.bytes.drain(..overflow);
        }
        self.bytes.extend(data);
    }

    fn text(&self) -> String {
        let bytes: Vec<u8> = self.bytes.iter().copied().collect();
        let text = String::from_utf8_lossy(&bytes);
        // The ring may start mid-character.
        text.trim_start_matches('\u{FFFD}').to_string()
    }
}

/// Tail shared between a reader thread and the supervisor.
#[derive(Debug, Clone)]
struct SharedTail(Arc<Mutex<TailBuffer>>);

impl SharedTail {
    fn new(cap: usize) -> Self {
        Self(Arc::new(Mutex::new(TailBuffer::new(cap))))
    }

    fn push(&self, data: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data);
    }

    /// Text captured so far, even while the reader is still blocked.
    fn text(&self) -> String {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).text()
    }
}

/// Take both output pipes, killing the child if either is missing.
fn take_pipes(child: &mut Child) -> Result<(ChildStdout, ChildStderr), ProcessError> {
    match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => Ok((stdout, stderr)),
        _ => {
            error!("child output pipes missing, killing process group");
            kill_process_group(child);
            let _ = child.wait();
            Err(ProcessError::MissingPipes)
        }
    }
}

/// Drain `reader` on a detached thread, signalling `done` at EOF.
fn spawn_reader<R: Read + Send + 'static>(reader: R, cap: usize, done: Sender<()>) -> SharedTail {
    let tail = SharedTail::new(cap);
    let sink = tail.clone();
    thread::spawn(move || {
        drain_into(reader, &sink);
        let _ = done.send(());
    });
    tail
}

fn drain_into<R: Read>(mut reader: R, tail: &SharedTail) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => tail.push(&chunk[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(err = %err, "output read failed, keeping partial tail");
                break;
            }
        }
    }
}

/// Wait up to `window` for `readers` EOF signals.
fn await_readers(done: &Receiver<()>, readers: usize, window: Duration) {
    let deadline = Instant::now() + window;
    for _ in 0..readers {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    window_ms = window.as_millis() as u64,
                    "output still held open by a process outside the group, keeping partial tail"
                );
                return;
            }
            // A reader panicked; whatever it captured is still in its tail.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// The last `limit` characters of `text`.
pub fn tail_chars(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    text.chars().skip(count - limit).collect()
}
