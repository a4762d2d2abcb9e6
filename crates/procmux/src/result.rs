//! Command results, completion handles and batch progress reporting.
//!
//! A submitted command resolves exactly once into an [`ExecutionResult`],
//! delivered through the [`CommandHandle`] returned by `submit` and through
//! the optional completion callback. Error kinds travel inside the result,
//! never as a panic or an `Err` to the submitting caller.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::mpsc;
use std::time::Duration;

/// Why a command failed, when it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The per-command deadline expired before the end marker was seen.
    TimedOut,
    /// The engine stopped while the command was in flight.
    Aborted,
    /// The submit arrived while the lifecycle gate was closed for a restart.
    Restarting,
    /// The submit arrived before `start` or after a terminal `stop`.
    NotRunning,
    /// A background thread failed and the command could not complete.
    SystemError,
}

/// Result of one interpreter command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Bytes the interpreter produced on stdout between this command's markers.
    pub stdout: Vec<u8>,
    /// Bytes attributed to this command on stderr (best-effort, see crate docs).
    pub stderr: Vec<u8>,
    /// 0 on success, negative otherwise.
    pub exit_code: i32,
    /// True when the end marker was seen and the deadline did not expire.
    pub success: bool,
    /// Wall time from submit to completion, in seconds.
    pub execution_seconds: f64,
    /// Failure kind when `success` is false; `None` on success.
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    /// Build a failed result that never reached the interpreter.
    pub(crate) fn failed(kind: FailureKind, message: &str) -> Self {
        let exit_code = match kind {
            FailureKind::Restarting => -2,
            FailureKind::NotRunning => -3,
            _ => -1,
        };
        ExecutionResult {
            stdout: Vec::new(),
            stderr: message.as_bytes().to_vec(),
            exit_code,
            success: false,
            execution_seconds: 0.0,
            failure: Some(kind),
        }
    }

    /// Stdout decoded as UTF-8, lossily.
    #[must_use]
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Stderr decoded as UTF-8, lossily.
    #[must_use]
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Callback invoked after a command's result promise has been resolved.
///
/// Runs on a reader, scanner or stop thread. Must not call back into
/// `ShellEngine::stop`.
pub type CompletionCallback = Box<dyn FnOnce(&ExecutionResult) + Send + 'static>;

/// Progress payload for batch executions.
#[derive(Debug, Clone, Default)]
pub struct BatchProgress {
    /// 1-based index of the command most recently submitted.
    pub current_command: usize,
    /// Total number of commands in the batch.
    pub total_commands: usize,
    /// Result of the most recently completed command.
    pub last_result: Option<ExecutionResult>,
    /// True once the batch has finished (possibly early on error).
    pub is_complete: bool,
    /// Results for all completed commands so far.
    pub all_results: Vec<ExecutionResult>,
}

/// Callback invoked after each command in a batch completes.
pub type BatchProgressCallback = Box<dyn Fn(&BatchProgress) + Send + 'static>;

pub(crate) type ResultSender = mpsc::Sender<ExecutionResult>;

/// Waitable handle for a submitted command.
///
/// The promise half lives inside the in-flight record; the engine resolves
/// it exactly once, on completion, timeout or stop.
#[derive(Debug)]
pub struct CommandHandle {
    rx: mpsc::Receiver<ExecutionResult>,
}

impl CommandHandle {
    /// Create a sender/handle pair for one command.
    pub(crate) fn pair() -> (ResultSender, CommandHandle) {
        let (tx, rx) = mpsc::channel();
        (tx, CommandHandle { rx })
    }

    /// Create a handle that is already resolved.
    pub(crate) fn ready(result: ExecutionResult) -> CommandHandle {
        let (tx, rx) = mpsc::channel();
        // Unbounded channel: the send cannot fail while rx is alive.
        let _ = tx.send(result);
        CommandHandle { rx }
    }

    /// Block until the command resolves.
    pub fn wait(&self) -> ExecutionResult {
        self.rx.recv().unwrap_or_else(|_| {
            ExecutionResult::failed(FailureKind::Aborted, "Engine dropped before completion.\n")
        })
    }

    /// Block up to `timeout` for the command to resolve.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExecutionResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(ExecutionResult::failed(
                FailureKind::Aborted,
                "Engine dropped before completion.\n",
            )),
        }
    }

    /// Non-blocking poll for the result.
    pub fn try_wait(&self) -> Option<ExecutionResult> {
        self.rx.try_recv().ok()
    }
}

/// Waitable handle for an asynchronous batch.
#[derive(Debug)]
pub struct BatchHandle {
    rx: mpsc::Receiver<Vec<ExecutionResult>>,
}

impl BatchHandle {
    pub(crate) fn pair() -> (mpsc::Sender<Vec<ExecutionResult>>, BatchHandle) {
        let (tx, rx) = mpsc::channel();
        (tx, BatchHandle { rx })
    }

    /// Block until the whole batch resolves.
    pub fn wait(&self) -> Vec<ExecutionResult> {
        self.rx.recv().unwrap_or_default()
    }

    /// Block up to `timeout` for the batch to resolve.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Vec<ExecutionResult>> {
        self.rx.recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_handle_resolves_immediately() {
        let handle = CommandHandle::ready(ExecutionResult::failed(
            FailureKind::NotRunning,
            "Interpreter process is not running.\n",
        ));
        let result = handle.wait();
        assert!(!result.success);
        assert_eq!(result.exit_code, -3);
        assert_eq!(result.failure, Some(FailureKind::NotRunning));
    }

    #[test]
    fn test_failed_exit_codes_by_kind() {
        assert_eq!(ExecutionResult::failed(FailureKind::TimedOut, "t").exit_code, -1);
        assert_eq!(ExecutionResult::failed(FailureKind::Restarting, "r").exit_code, -2);
        assert_eq!(ExecutionResult::failed(FailureKind::NotRunning, "n").exit_code, -3);
        assert_eq!(ExecutionResult::failed(FailureKind::Aborted, "a").exit_code, -1);
    }

    #[test]
    fn test_wait_timeout_returns_none_when_pending() {
        let (_tx, handle) = CommandHandle::pair();
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_dropped_sender_resolves_as_aborted() {
        let (tx, handle) = CommandHandle::pair();
        drop(tx);
        let result = handle.wait();
        assert_eq!(result.failure, Some(FailureKind::Aborted));
    }

    #[test]
    fn test_result_text_accessors_are_lossy() {
        let mut result = ExecutionResult::failed(FailureKind::SystemError, "x");
        result.stdout = vec![0x68, 0x69, 0xff];
        assert!(result.stdout_text().starts_with("hi"));
    }
}
