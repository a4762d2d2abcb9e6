//! Error types for the procmux library

use thiserror::Error;

/// Errors that can occur in the procmux library
#[derive(Error, Debug)]
pub enum ProcmuxError {
    // Engine lifecycle errors
    #[error("Interpreter process is not running")]
    NotRunning,

    #[error("Interpreter process is restarting")]
    Restarting,

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Failed to spawn interpreter process: {0}")]
    Spawn(#[source] std::io::Error),

    // Command errors
    #[error("Command timed out")]
    TimedOut,

    #[error("Host stopped while the command was in flight")]
    Aborted,

    // Bulk channel errors
    #[error("Operation would block")]
    WouldBlock,

    #[error("Output buffer too small: {required} bytes required")]
    BufferTooSmall { required: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Channel '{name}' has incompatible frame size: expected {expected}, found {actual}")]
    IncompatibleFrame {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Channel is in a bad state: {0}")]
    BadState(String),

    // OS-level errors
    #[error("System error: {0}")]
    System(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for procmux operations
pub type Result<T> = std::result::Result<T, ProcmuxError>;

/// Wire status code for a successful bulk-channel operation.
pub const STATUS_OK: i32 = 0;

impl ProcmuxError {
    /// Integer status code matching the bulk-channel wire contract.
    ///
    /// `ok=0, timeout=1, would_block=2, buffer_too_small=3, invalid_arg=-1,
    /// system_error=-2, bad_state=-3`. Engine lifecycle kinds that never
    /// surface from bulk-channel calls map to `system_error`.
    #[must_use]
    pub fn status_code(&self) -> i32 {
        match self {
            ProcmuxError::TimedOut => 1,
            ProcmuxError::WouldBlock => 2,
            ProcmuxError::BufferTooSmall { .. } => 3,
            ProcmuxError::InvalidArg(_) | ProcmuxError::IncompatibleFrame { .. } => -1,
            ProcmuxError::BadState(_) => -3,
            _ => -2,
        }
    }
}
