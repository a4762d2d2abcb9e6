//! procmux - Command multiplexer for embedded interpreter processes
//!
//! This library keeps one foreign command interpreter alive as a child
//! process and multiplexes many logical commands over its single
//! stdin/stdout/stderr pair, concurrently, with per-command timeouts and a
//! shared-memory side channel for bulk binary payloads.
//!
//! # Overview
//!
//! Commands are framed with unique begin/end marker strings the
//! interpreter prints to stdout; because the interpreter executes packets
//! sequentially, a single FIFO head pointer demultiplexes interleaved
//! output back to per-command result buffers. Stderr carries no framing
//! and is attributed to the oldest in-flight command, best-effort.
//!
//! # Example
//!
//! ```no_run
//! use procmux::{EngineConfig, ShellEngine};
//!
//! fn main() {
//!     let engine = ShellEngine::new(EngineConfig::default());
//!     engine.start().expect("interpreter started");
//!
//!     let result = engine.execute("Get-Date", 5.0);
//!     if result.success {
//!         print!("{}", result.stdout_text());
//!     }
//!
//!     engine.stop(false);
//! }
//! ```
//!
//! # Bulk payloads
//!
//! For payloads too large or too hot for the text pipes, [`BulkChannel`]
//! maps a named shared-memory region with a fixed 128-byte header, one
//! cross-process mutex and four advisory events, moving bytes in either
//! direction without touching the pipes. Payloads larger than one frame
//! travel as acknowledged chunks.
//!
//! # Concurrency
//!
//! One writer thread, two reader threads and a 10 ms deadline scanner run
//! per engine. Commands execute in submit order and resolve in the same
//! order; a timed-out command resolves immediately and its late output is
//! discarded. `stop` must not be called from an I/O thread or from a
//! completion callback.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod result;
pub mod shm;

mod process;
mod pump;
mod tracker;

// Re-exports for convenience
pub use adapter::{InterpreterAdapter, PosixShellAdapter, PwshAdapter};
pub use config::EngineConfig;
pub use engine::ShellEngine;
pub use error::{ProcmuxError, Result, STATUS_OK};
pub use result::{
    BatchHandle, BatchProgress, CommandHandle, ExecutionResult, FailureKind,
};
pub use shm::{BulkChannel, Direction, HeaderSnapshot, HEADER_BYTES, MAGIC, VERSION};
