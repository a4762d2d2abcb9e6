//! The engine: subprocess lifecycle, submit/execute façade, deadline
//! scanner and auto-restart.
//!
//! One [`ShellEngine`] owns one interpreter child and multiplexes every
//! submitted command over its stdio. The lifecycle is explicit:
//! [`ShellEngine::start`] spawns the child and the I/O threads,
//! [`ShellEngine::stop`] tears everything down and fails in-flight
//! commands. `stop` must not be called from a completion callback.

use crate::adapter::{begin_marker, end_marker, InterpreterAdapter, PosixShellAdapter, PwshAdapter};
use crate::config::EngineConfig;
use crate::error::{ProcmuxError, Result};
use crate::pump::{self, WriteQueue};
use crate::process::ChildShell;
use crate::result::{
    BatchHandle, BatchProgress, BatchProgressCallback, CommandHandle, CompletionCallback,
    ExecutionResult, FailureKind,
};
use crate::tracker::{CmdRecord, CommandTracker};
use std::collections::BTreeMap;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::process::ChildStdin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Deadline scanner tick.
const SCAN_TICK: Duration = Duration::from_millis(10);

/// Grace period a non-forced stop waits for the child to exit.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Timeout for the startup warm-up command.
const WARMUP_TIMEOUT: f64 = 5.0;

#[derive(Default)]
struct ThreadHandles {
    writer: Option<JoinHandle<()>>,
    stdout_reader: Option<JoinHandle<()>>,
    stderr_reader: Option<JoinHandle<()>>,
    scanner: Option<JoinHandle<()>>,
}

struct EngineInner {
    config: EngineConfig,
    adapter: Arc<dyn InterpreterAdapter>,
    tracker: CommandTracker,
    write_queue: WriteQueue,
    seq: AtomicU64,
    running: AtomicBool,
    io_running: AtomicBool,
    timer_running: AtomicBool,
    /// Closed while a full restart is in progress; submits are rejected.
    lifecycle_gate: AtomicBool,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<ChildShell>>,
    threads: Mutex<ThreadHandles>,
    /// Serializes `start`/`stop` against each other.
    lifecycle_mx: Mutex<()>,
}

/// A long-lived host for one embedded interpreter process.
pub struct ShellEngine {
    inner: Arc<EngineInner>,
}

impl ShellEngine {
    /// Create an engine with an adapter inferred from the configured
    /// interpreter path (PowerShell by default).
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let adapter = default_adapter(&config.interpreter_path);
        Self::with_adapter(config, adapter)
    }

    /// Create an engine with an explicit interpreter adapter.
    #[must_use]
    pub fn with_adapter(config: EngineConfig, adapter: Arc<dyn InterpreterAdapter>) -> Self {
        ShellEngine {
            inner: Arc::new(EngineInner {
                config,
                adapter,
                tracker: CommandTracker::new(),
                write_queue: WriteQueue::new(),
                seq: AtomicU64::new(0),
                running: AtomicBool::new(false),
                io_running: AtomicBool::new(false),
                timer_running: AtomicBool::new(false),
                lifecycle_gate: AtomicBool::new(false),
                stdin: Mutex::new(None),
                child: Mutex::new(None),
                threads: Mutex::new(ThreadHandles::default()),
                lifecycle_mx: Mutex::new(()),
            }),
        }
    }

    /// Spawn the interpreter and the I/O machinery, then run the warm-up
    /// command, the configured startup commands and the optional
    /// session-restore hook (all non-fatal).
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Tear the engine down. Idempotent; in-flight commands resolve with
    /// an `Aborted` result. Must not be called from an I/O thread or a
    /// completion callback.
    pub fn stop(&self, force: bool) {
        self.inner.stop_internal(force, true);
    }

    /// Whether the engine is started and the child process is alive.
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// Submit a command without waiting. `timeout_seconds <= 0` uses the
    /// configured default; a zero default disables the deadline.
    pub fn submit(
        &self,
        command: impl Into<String>,
        timeout_seconds: f64,
        callback: Option<CompletionCallback>,
    ) -> CommandHandle {
        self.inner
            .submit_inner(command.into(), timeout_seconds, callback, false)
    }

    /// Submit and block until the result arrives or the timeout elapses.
    pub fn execute(&self, command: impl Into<String>, timeout_seconds: f64) -> ExecutionResult {
        let handle = self.submit(command, timeout_seconds, None);
        let effective = self.inner.config.effective_timeout(timeout_seconds);
        self.inner.wait_handle(&handle, effective)
    }

    /// Submit with an optional completion callback; alias of [`Self::submit`]
    /// kept for symmetry with [`Self::execute`].
    pub fn execute_async(
        &self,
        command: impl Into<String>,
        timeout_seconds: f64,
        callback: Option<CompletionCallback>,
    ) -> CommandHandle {
        self.submit(command, timeout_seconds, callback)
    }

    /// Join `commands` into one newline-separated body and execute it as a
    /// single packet.
    pub fn execute_batch(&self, commands: &[String], timeout_seconds: f64) -> ExecutionResult {
        let mut joined = String::with_capacity(commands.iter().map(|c| c.len() + 1).sum());
        for command in commands {
            if !command.is_empty() {
                joined.push_str(command);
                joined.push('\n');
            }
        }
        self.execute(joined, timeout_seconds)
    }

    /// Run `commands` one at a time on a helper thread, reporting progress
    /// after each completion.
    pub fn execute_async_batch(
        &self,
        commands: Vec<String>,
        progress_callback: Option<BatchProgressCallback>,
        stop_on_first_error: bool,
        per_command_timeout: f64,
    ) -> BatchHandle {
        let (tx, handle) = BatchHandle::pair();
        let inner = Arc::clone(&self.inner);

        std::thread::spawn(move || {
            let mut progress = BatchProgress {
                total_commands: commands.len(),
                ..BatchProgress::default()
            };

            for command in commands {
                progress.current_command += 1;
                let cmd_handle = inner.submit_inner(command, per_command_timeout, None, false);
                let result = inner.wait_handle(&cmd_handle, per_command_timeout);

                progress.last_result = Some(result.clone());
                progress.all_results.push(result.clone());
                if let Some(cb) = &progress_callback {
                    let _ = catch_unwind(AssertUnwindSafe(|| cb(&progress)));
                }
                if stop_on_first_error && !result.success {
                    break;
                }
            }

            progress.is_complete = true;
            if let Some(cb) = &progress_callback {
                let _ = catch_unwind(AssertUnwindSafe(|| cb(&progress)));
            }
            let _ = tx.send(progress.all_results);
        });

        handle
    }

    /// Run the script at `path` with positional arguments. A missing file
    /// fails fast without touching the interpreter.
    pub fn execute_script(
        &self,
        path: impl AsRef<Path>,
        args: &[String],
        timeout_seconds: f64,
        dot_source: bool,
    ) -> ExecutionResult {
        let Some(script) = resolve_script(path.as_ref()) else {
            return ExecutionResult::failed(
                FailureKind::SystemError,
                &format!("Could not open script file: {}", path.as_ref().display()),
            );
        };
        let command = self
            .inner
            .adapter
            .script_command(&script, args, dot_source);
        self.execute(command, timeout_seconds)
    }

    /// Run the script at `path` with named arguments.
    pub fn execute_script_kv(
        &self,
        path: impl AsRef<Path>,
        named_args: &BTreeMap<String, String>,
        timeout_seconds: f64,
        dot_source: bool,
    ) -> ExecutionResult {
        let Some(script) = resolve_script(path.as_ref()) else {
            return ExecutionResult::failed(
                FailureKind::SystemError,
                &format!("Could not open script file: {}", path.as_ref().display()),
            );
        };
        let command = self
            .inner
            .adapter
            .script_command_kv(&script, named_args, dot_source);
        self.execute(command, timeout_seconds)
    }

    /// Change the interpreter's working directory.
    pub fn set_working_directory(&self, dir: &str) -> bool {
        self.execute(self.inner.adapter.set_workdir_command(dir), 0.0)
            .success
    }

    /// The interpreter's absolute working directory, or empty on failure.
    pub fn get_working_directory(&self) -> String {
        let result = self.execute(self.inner.adapter.get_workdir_command(), 0.0);
        if !result.success {
            return String::new();
        }
        result.stdout_text().trim().to_string()
    }

    /// Set a process-scoped environment variable inside the interpreter.
    pub fn set_environment_variable(&self, name: &str, value: &str) -> bool {
        self.execute(self.inner.adapter.set_env_command(name, value), 0.0)
            .success
    }

    /// Read a process-scoped environment variable from the interpreter.
    pub fn get_environment_variable(&self, name: &str) -> String {
        let result = self.execute(self.inner.adapter.get_env_command(name), 0.0);
        if !result.success {
            return String::new();
        }
        result.stdout_text().trim().to_string()
    }

    /// Number of commands currently in flight.
    pub fn inflight_count(&self) -> u32 {
        self.inner.tracker.inflight_count()
    }

    /// Peak number of simultaneously in-flight commands.
    pub fn inflight_high_water(&self) -> u32 {
        self.inner.tracker.high_water()
    }

    /// Stderr chunks that arrived with no in-flight command to own them.
    pub fn dropped_stderr_chunks(&self) -> u64 {
        self.inner.tracker.dropped_stderr_chunks()
    }
}

impl Drop for ShellEngine {
    fn drop(&mut self) {
        if self.inner.running.load(Ordering::Acquire) {
            self.inner.stop_internal(true, true);
        }
    }
}

impl EngineInner {
    fn start(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle_mx.lock().expect("lifecycle mutex poisoned");
        if self.running.load(Ordering::Acquire) {
            return Err(ProcmuxError::AlreadyRunning);
        }

        info!(
            interpreter = %self.effective_program(),
            "starting interpreter engine"
        );
        let (child, io) = ChildShell::spawn(&self.config, self.adapter.as_ref())?;

        *self.stdin.lock().expect("stdin handle poisoned") = Some(io.stdin);
        *self.child.lock().expect("child handle poisoned") = Some(child);
        self.io_running.store(true, Ordering::Release);
        self.timer_running.store(true, Ordering::Release);
        self.running.store(true, Ordering::Release);

        let spawn_result = self.spawn_io_threads(io.stdout, io.stderr);
        if let Err(e) = spawn_result {
            self.rollback_start();
            return Err(e);
        }

        // Non-fatal warm-up: primes the pipeline and validates the path.
        if let Some(warmup) = self.adapter.warmup_command() {
            let result = self.run_internal(warmup, WARMUP_TIMEOUT);
            if !result.success {
                debug!("warm-up command failed: {}", result.stderr_text());
            }
        }

        if !self.config.startup_commands.is_empty() {
            let mut joined = String::new();
            for command in &self.config.startup_commands {
                joined.push_str(command);
                joined.push('\n');
            }
            let result = self.run_internal(joined, self.config.timeout_seconds);
            if !result.success {
                warn!("startup commands failed: {}", result.stderr_text());
            }
        }

        self.run_session_restore();
        Ok(())
    }

    fn spawn_io_threads(
        self: &Arc<Self>,
        stdout: std::process::ChildStdout,
        stderr: std::process::ChildStderr,
    ) -> Result<()> {
        let writer = {
            let inner = Arc::clone(self);
            spawn_named("procmux-writer", move || {
                pump::writer_loop(&inner.write_queue, &inner.stdin, &inner.io_running);
            })?
        };
        let stdout_reader = {
            let inner = Arc::clone(self);
            spawn_named("procmux-stdout", move || {
                pump::reader_loop(stdout, &inner.io_running, |chunk| {
                    inner.handle_stdout(chunk);
                });
            })?
        };
        let stderr_reader = {
            let inner = Arc::clone(self);
            spawn_named("procmux-stderr", move || {
                pump::reader_loop(stderr, &inner.io_running, |chunk| {
                    inner.handle_stderr(chunk);
                });
            })?
        };
        let scanner = {
            let inner = Arc::clone(self);
            spawn_named("procmux-scanner", move || inner.scanner_loop())?
        };

        let mut threads = self.threads.lock().expect("thread handles poisoned");
        threads.writer = Some(writer);
        threads.stdout_reader = Some(stdout_reader);
        threads.stderr_reader = Some(stderr_reader);
        threads.scanner = Some(scanner);
        Ok(())
    }

    /// Undo a partially completed `start` after an I/O thread failed to
    /// spawn. The child is terminated so any threads that did start see EOF.
    fn rollback_start(&self) {
        self.io_running.store(false, Ordering::Release);
        self.timer_running.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.write_queue.wake_all();
        self.stdin.lock().expect("stdin handle poisoned").take();
        if let Some(mut child) = self.child.lock().expect("child handle poisoned").take() {
            child.terminate();
        }
        let mut threads = self.threads.lock().expect("thread handles poisoned");
        for handle in [
            threads.writer.take(),
            threads.stdout_reader.take(),
            threads.stderr_reader.take(),
            threads.scanner.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
    }

    fn run_session_restore(self: &Arc<Self>) {
        let (Some(script), Some(snapshot)) = (
            self.config.restore_script_path.as_ref(),
            self.config.snapshot_path.as_ref(),
        ) else {
            return;
        };
        if !snapshot.exists() {
            debug!(snapshot = %snapshot.display(), "no session snapshot to restore");
            return;
        }

        let command = self.adapter.restore_command(script, snapshot);
        let timeout = if self.config.timeout_seconds > 0.0 {
            self.config.timeout_seconds
        } else {
            WARMUP_TIMEOUT
        };
        let result = self.run_internal(command, timeout);
        if result.success {
            info!("session restore succeeded");
        } else {
            warn!(
                exit = result.exit_code,
                "session restore failed: {}",
                result.stderr_text()
            );
        }
    }

    /// Execute a startup-internal command, bypassing the lifecycle gate.
    fn run_internal(self: &Arc<Self>, command: String, timeout_seconds: f64) -> ExecutionResult {
        let handle = self.submit_inner(command, timeout_seconds, None, true);
        self.wait_handle(&handle, timeout_seconds)
    }

    /// Wait on a handle for up to `timeout_seconds` (forever when zero),
    /// synthesizing a timeout result when the wait expires first.
    fn wait_handle(&self, handle: &CommandHandle, timeout_seconds: f64) -> ExecutionResult {
        if timeout_seconds > 0.0 {
            handle
                .wait_timeout(Duration::from_secs_f64(timeout_seconds))
                .unwrap_or_else(|| ExecutionResult::failed(FailureKind::TimedOut, "timeout"))
        } else {
            handle.wait()
        }
    }

    fn stop_internal(&self, force: bool, clear_gate: bool) {
        let _lifecycle = self.lifecycle_mx.lock().expect("lifecycle mutex poisoned");
        if !self.running.load(Ordering::Acquire) {
            if clear_gate {
                self.lifecycle_gate.store(false, Ordering::Release);
            }
            return;
        }

        self.lifecycle_gate.store(true, Ordering::Release);
        debug!(force, "stopping interpreter engine");

        // Request cooperative shutdown of the writer, then ask the
        // interpreter to exit and close its stdin. try_lock: if the writer
        // is mid-write on a full pipe, skip the courtesy and let child
        // death break the write below.
        self.io_running.store(false, Ordering::Release);
        self.write_queue.wake_all();
        if let Ok(mut guard) = self.stdin.try_lock() {
            if let Some(stdin) = guard.as_mut() {
                let _ = stdin.write_all(self.adapter.exit_command().as_bytes());
                let _ = stdin.flush();
            }
            guard.take();
        }

        self.timer_running.store(false, Ordering::Release);

        // Wait for the child; force-terminate when asked.
        let grace = if force { Duration::ZERO } else { STOP_GRACE };
        let child_dead = {
            let mut child_guard = self.child.lock().expect("child handle poisoned");
            let mut exited = match child_guard.as_mut() {
                Some(child) => child.wait_timeout(grace),
                None => true,
            };
            if !exited && force {
                if let Some(child) = child_guard.as_mut() {
                    child.terminate();
                }
                exited = true;
            }
            exited
        };

        // Join the I/O threads. A still-alive child (non-forced stop that
        // the interpreter ignored) keeps its readers blocked; their handles
        // are dropped and the threads exit on the eventual EOF.
        {
            let mut threads = self.threads.lock().expect("thread handles poisoned");
            if let Some(scanner) = threads.scanner.take() {
                let _ = scanner.join();
            }
            let writer = threads.writer.take();
            let stdout_reader = threads.stdout_reader.take();
            let stderr_reader = threads.stderr_reader.take();
            if child_dead {
                for handle in [writer, stdout_reader, stderr_reader].into_iter().flatten() {
                    let _ = handle.join();
                }
            }
        }
        if let Ok(mut guard) = self.stdin.try_lock() {
            guard.take();
        }

        self.running.store(false, Ordering::Release);

        // Fail every still-in-flight command deterministically.
        for mut record in self.tracker.drain_all() {
            record.err_buf.extend_from_slice(b"Process stopped.\n");
            resolve_record(record, Some(FailureKind::Aborted));
        }
        self.write_queue.clear();
        self.child.lock().expect("child handle poisoned").take();

        if clear_gate {
            self.lifecycle_gate.store(false, Ordering::Release);
        }
    }

    fn is_alive(&self) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        self.child
            .lock()
            .expect("child handle poisoned")
            .as_mut()
            .is_some_and(ChildShell::is_alive)
    }

    fn submit_inner(
        &self,
        command: String,
        timeout_seconds: f64,
        callback: Option<CompletionCallback>,
        bypass_gate: bool,
    ) -> CommandHandle {
        if self.lifecycle_gate.load(Ordering::Acquire) && !bypass_gate {
            return CommandHandle::ready(ExecutionResult::failed(
                FailureKind::Restarting,
                "Interpreter process is restarting.\n",
            ));
        }
        if !self.running.load(Ordering::Acquire) {
            return CommandHandle::ready(ExecutionResult::failed(
                FailureKind::NotRunning,
                "Interpreter process is not running.\n",
            ));
        }

        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let effective = self.config.effective_timeout(timeout_seconds);
        let deadline =
            (effective > 0.0).then(|| started + Duration::from_secs_f64(effective));

        let (sender, handle) = CommandHandle::pair();
        let record = CmdRecord {
            id,
            begin_marker: begin_marker(id).into_bytes(),
            end_marker: end_marker(id).into_bytes(),
            pre_buf: Vec::new(),
            out_buf: Vec::new(),
            err_buf: Vec::new(),
            begun: false,
            timed_out: false,
            started,
            deadline,
            sender: Some(sender),
            callback,
        };

        // Register before enqueueing so the readers can demultiplex the
        // very first chunk.
        self.tracker.register(record);
        let packet = self.adapter.build_packet(id, &command);
        trace!(id, bytes = packet.len(), "command submitted");
        self.write_queue.push(packet);
        handle
    }

    fn handle_stdout(&self, chunk: &[u8]) {
        for record in self.tracker.on_stdout(chunk) {
            resolve_record(record, None);
        }
    }

    fn handle_stderr(self: &Arc<Self>, chunk: &[u8]) {
        if let Some(record) = self.tracker.on_stderr(chunk) {
            // The interpreter reported an internal timeout for the head
            // command; no sentinel tally was pending for it.
            self.fulfill_timeout(record, false);
        }
    }

    fn scanner_loop(self: &Arc<Self>) {
        while self.timer_running.load(Ordering::Acquire) {
            std::thread::sleep(SCAN_TICK);
            if !self.timer_running.load(Ordering::Acquire) {
                break;
            }
            for record in self.tracker.expire_due(Instant::now()) {
                self.fulfill_timeout(record, true);
            }
        }
    }

    fn fulfill_timeout(self: &Arc<Self>, mut record: CmdRecord, expect_sentinel: bool) {
        debug!(id = record.id, "command timed out");
        if expect_sentinel {
            self.tracker.expect_sentinel();
        }
        if record.err_buf.is_empty() {
            record.err_buf.extend_from_slice(b"timeout");
        }
        if self.config.auto_restart_on_timeout {
            self.request_restart();
        }
        resolve_record(record, Some(FailureKind::TimedOut));
    }

    /// Spawn the restart thread, holding the lifecycle gate for its whole
    /// duration. Only the first caller wins; later timeouts piggyback on
    /// the pending restart.
    fn request_restart(self: &Arc<Self>) {
        if self
            .lifecycle_gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("restart already pending");
            return;
        }

        let inner = Arc::clone(self);
        let spawned = spawn_named("procmux-restart", move || {
            info!("restarting interpreter after command timeout");
            inner.stop_internal(true, false);
            if let Err(e) = inner.start() {
                warn!("interpreter restart failed: {e}");
            }
            inner.lifecycle_gate.store(false, Ordering::Release);
        });
        if spawned.is_err() {
            self.lifecycle_gate.store(false, Ordering::Release);
            warn!("failed to spawn restart thread");
        }
    }

    fn effective_program(&self) -> &str {
        if self.config.interpreter_path.is_empty() {
            self.adapter.program()
        } else {
            &self.config.interpreter_path
        }
    }
}

/// Resolve the promise and run the callback for a finished record.
/// `failure` is `None` for end-marker completions; a set `timed_out` flag
/// still fails the command.
fn resolve_record(mut record: CmdRecord, failure: Option<FailureKind>) {
    let success = failure.is_none() && !record.timed_out;
    let failure = if success {
        None
    } else if record.timed_out {
        Some(FailureKind::TimedOut)
    } else {
        failure
    };

    let result = ExecutionResult {
        stdout: std::mem::take(&mut record.out_buf),
        stderr: std::mem::take(&mut record.err_buf),
        exit_code: if success { 0 } else { -1 },
        success,
        execution_seconds: record.started.elapsed().as_secs_f64(),
        failure,
    };
    trace!(
        id = record.id,
        success,
        out_len = result.stdout.len(),
        err_len = result.stderr.len(),
        "command resolved"
    );

    // Promise first, then the callback; user panics never cross a thread.
    let callback = record.callback.take();
    if let Some(cb) = callback {
        if let Some(sender) = record.sender.take() {
            let _ = sender.send(result.clone());
        }
        let _ = catch_unwind(AssertUnwindSafe(|| cb(&result)));
    } else if let Some(sender) = record.sender.take() {
        let _ = sender.send(result);
    }
}

fn resolve_script(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Some(absolute.to_string_lossy().into_owned())
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| ProcmuxError::System(format!("failed to spawn {name} thread: {e}")))
}

fn default_adapter(interpreter_path: &str) -> Arc<dyn InterpreterAdapter> {
    let file_name = Path::new(interpreter_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if file_name.is_empty() || file_name.contains("pwsh") || file_name.contains("powershell") {
        Arc::new(PwshAdapter)
    } else {
        Arc::new(PosixShellAdapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_before_start_fails_with_not_running() {
        let engine = ShellEngine::new(EngineConfig::default());
        let result = engine.execute("echo hi", 1.0);
        assert!(!result.success);
        assert_eq!(result.exit_code, -3);
        assert_eq!(result.failure, Some(FailureKind::NotRunning));
    }

    #[test]
    fn test_submit_during_restart_fails_with_restarting() {
        let engine = ShellEngine::new(EngineConfig::default());
        engine.inner.lifecycle_gate.store(true, Ordering::Release);
        let result = engine.execute("echo hi", 1.0);
        assert_eq!(result.exit_code, -2);
        assert_eq!(result.failure, Some(FailureKind::Restarting));
    }

    #[test]
    fn test_default_adapter_selection() {
        assert_eq!(default_adapter("").program(), "pwsh");
        assert_eq!(default_adapter("/opt/pwsh/pwsh").program(), "pwsh");
        assert_eq!(default_adapter("powershell.exe").program(), "pwsh");
        assert_eq!(default_adapter("/bin/sh").program(), "sh");
        assert_eq!(default_adapter("/usr/bin/bash").program(), "sh");
    }

    #[test]
    fn test_stop_before_start_is_a_no_op() {
        let engine = ShellEngine::new(EngineConfig::default());
        engine.stop(true);
        engine.stop(false);
        assert!(!engine.is_alive());
    }

    #[test]
    fn test_execute_script_missing_file_fails_fast() {
        let engine = ShellEngine::new(EngineConfig::default());
        let result = engine.execute_script("/nonexistent/script.ps1", &[], 1.0, false);
        assert!(!result.success);
        assert!(result
            .stderr_text()
            .contains("Could not open script file"));
    }
}
