//! Child interpreter process lifecycle.
//!
//! Spawning wires three anonymous pipes to the child's stdio; the parent
//! keeps the write end of stdin and the read ends of stdout/stderr
//! (`std::process` closes the child-side ends in the parent after spawn and
//! marks the parent-side ends close-on-exec). Termination is graceful
//! first, forced second.

use crate::adapter::InterpreterAdapter;
use crate::config::EngineConfig;
use crate::error::{ProcmuxError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long to watch a fresh child for instant death before declaring the
/// spawn successful.
const SPAWN_PROBE_WINDOW: Duration = Duration::from_millis(200);

/// Pause between SIGTERM and SIGKILL in a forced termination.
const TERM_TO_KILL_DELAY: Duration = Duration::from_millis(500);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Parent-side pipe ends for a spawned interpreter.
pub(crate) struct ChildIo {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// A spawned interpreter child process.
pub(crate) struct ChildShell {
    child: Child,
}

impl ChildShell {
    /// Spawn the interpreter described by `config` and `adapter` with all
    /// three stdio streams piped.
    pub fn spawn(config: &EngineConfig, adapter: &dyn InterpreterAdapter) -> Result<(Self, ChildIo)> {
        let program = if config.interpreter_path.is_empty() {
            adapter.program().to_string()
        } else {
            config.interpreter_path.clone()
        };

        let mut command = Command::new(&program);
        command
            .args(adapter.launch_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group: forced termination reaches interpreter
            // grandchildren too, so they cannot keep the output pipes
            // open past a kill, and terminal signals do not leak in.
            .process_group(0);
        if !config.working_directory.is_empty() {
            command.current_dir(&config.working_directory);
        }
        for (key, value) in &config.environment {
            command.env(key, value);
        }

        debug!(program = %program, "spawning interpreter");
        let mut child = command.spawn().map_err(ProcmuxError::Spawn)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcmuxError::Spawn(std::io::Error::other(
                "child stdio pipes were not created",
            )));
        };

        // Catch interpreters that die immediately (bad arguments, missing
        // runtime) before the engine starts pumping commands at them.
        let deadline = Instant::now() + SPAWN_PROBE_WINDOW;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(ProcmuxError::Spawn(std::io::Error::other(format!(
                        "interpreter exited during startup: {status}"
                    ))));
                }
                Ok(None) => {}
                Err(e) => return Err(ProcmuxError::Spawn(e)),
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }

        Ok((
            ChildShell { child },
            ChildIo {
                stdin,
                stdout,
                stderr,
            },
        ))
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking liveness check. Reaps the child if it has exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Poll for child exit up to `timeout`. Returns true when it exited.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(_) => return false,
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Forced termination of the child's whole process group: SIGTERM, a
    /// short wait, then SIGKILL, then reap.
    pub fn terminate(&mut self) {
        let group = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = killpg(group, Signal::SIGTERM) {
            debug!("SIGTERM failed (child likely gone): {e}");
        }
        if self.wait_timeout(TERM_TO_KILL_DELAY) {
            let _ = killpg(group, Signal::SIGKILL);
            return;
        }
        if let Err(e) = killpg(group, Signal::SIGKILL) {
            warn!("SIGKILL failed: {e}");
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PosixShellAdapter;

    #[test]
    fn test_spawn_and_terminate_sh() {
        let config = EngineConfig::default();
        let (mut shell, _io) =
            ChildShell::spawn(&config, &PosixShellAdapter).expect("spawn sh");
        assert!(shell.is_alive());
        shell.terminate();
        assert!(!shell.is_alive());
    }

    #[test]
    fn test_spawn_missing_interpreter_fails() {
        let config = EngineConfig {
            interpreter_path: "/nonexistent/interpreter".into(),
            ..EngineConfig::default()
        };
        let err = ChildShell::spawn(&config, &PosixShellAdapter).err();
        assert!(matches!(err, Some(ProcmuxError::Spawn(_))));
    }

    #[test]
    fn test_wait_timeout_observes_clean_exit() {
        let config = EngineConfig::default();
        let (mut shell, io) = ChildShell::spawn(&config, &PosixShellAdapter).expect("spawn sh");
        // Closing stdin makes sh exit on its own.
        drop(io.stdin);
        assert!(shell.wait_timeout(Duration::from_secs(5)));
    }
}
