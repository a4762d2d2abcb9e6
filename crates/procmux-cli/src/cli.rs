//! CLI argument definitions for procmux
//!
//! Uses clap for argument parsing. This module defines all subcommands
//! and their options.

use clap::{Parser, Subcommand, ValueEnum};

/// procmux - persistent interpreter sessions from the command line
///
/// Keeps one interpreter process alive behind a command multiplexer and
/// exposes its shared-memory bulk channel for large payloads.
#[derive(Parser, Debug)]
#[command(name = "procmux")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Quiet mode - suppress everything except command output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command inside a fresh interpreter session
    #[command(trailing_var_arg = true)]
    #[command(after_help = "EXAMPLES:
    # Run one PowerShell command
    procmux run -- 'Get-Date'

    # Use a specific interpreter binary
    procmux run --interpreter /usr/bin/pwsh -- '$PSVersionTable.PSVersion'

    # POSIX shell with a timeout
    procmux run --interpreter sh --timeout 5 -- 'echo hi'

    # JSON result for scripting
    procmux run --json -- 'Get-Location'
")]
    Run(RunArgs),

    /// Start an interactive session against a persistent interpreter
    #[command(after_help = "EXAMPLES:
    # Interactive PowerShell session, one result per line
    procmux shell

    # Same with a POSIX shell and a 10-second per-command timeout
    procmux shell --interpreter sh --timeout 10
")]
    Shell(ShellArgs),

    /// Shared-memory bulk channel tools
    #[command(subcommand)]
    Bulk(BulkCommands),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Interpreter executable (default: pwsh)
    #[arg(long, default_value = "")]
    pub interpreter: String,

    /// Working directory for the interpreter
    #[arg(long)]
    pub workdir: Option<String>,

    /// Extra environment variables as KEY=VALUE
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Per-command timeout in seconds (0 disables the deadline)
    #[arg(long, default_value_t = 30.0)]
    pub timeout: f64,

    /// Commands executed right after startup
    #[arg(long = "startup", value_name = "COMMAND")]
    pub startup: Vec<String>,

    /// Print the result as JSON instead of raw streams
    #[arg(long)]
    pub json: bool,

    /// The command to execute
    #[arg(required = true)]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ShellArgs {
    /// Interpreter executable (default: pwsh)
    #[arg(long, default_value = "")]
    pub interpreter: String,

    /// Working directory for the interpreter
    #[arg(long)]
    pub workdir: Option<String>,

    /// Per-command timeout in seconds (0 disables the deadline)
    #[arg(long, default_value_t = 30.0)]
    pub timeout: f64,

    /// Restart the interpreter automatically after a command timeout
    #[arg(long)]
    pub auto_restart: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BulkDirection {
    /// Host to interpreter (the a2b lane)
    ToShell,
    /// Interpreter to host (the b2a lane)
    FromShell,
}

#[derive(Subcommand, Debug)]
pub enum BulkCommands {
    /// Write stdin into a channel
    #[command(after_help = "EXAMPLES:
    # Publish a file into the channel
    procmux bulk write --name demo --frame-bytes 1048576 < payload.bin

    # Chunked transfer for payloads larger than one frame
    procmux bulk write --name demo --frame-bytes 1048576 --chunk-size 65536 < big.bin
")]
    Write(BulkWriteArgs),

    /// Read a pending payload from a channel onto stdout
    Read(BulkReadArgs),

    /// Print a channel's header snapshot
    Header(BulkHeaderArgs),

    /// Remove a channel's named objects
    Unlink(BulkUnlinkArgs),
}

#[derive(Parser, Debug)]
pub struct BulkWriteArgs {
    /// Channel name
    #[arg(long)]
    pub name: String,

    /// Per-direction frame capacity in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    pub frame_bytes: u64,

    /// Transfer direction
    #[arg(long, value_enum, default_value_t = BulkDirection::ToShell)]
    pub direction: BulkDirection,

    /// Chunk size for payloads larger than one frame; omit for single-frame
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Operation timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

#[derive(Parser, Debug)]
pub struct BulkReadArgs {
    /// Channel name
    #[arg(long)]
    pub name: String,

    /// Per-direction frame capacity in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    pub frame_bytes: u64,

    /// Transfer direction
    #[arg(long, value_enum, default_value_t = BulkDirection::ToShell)]
    pub direction: BulkDirection,

    /// Expect a chunked transfer
    #[arg(long)]
    pub chunked: bool,

    /// Operation timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

#[derive(Parser, Debug)]
pub struct BulkHeaderArgs {
    /// Channel name
    #[arg(long)]
    pub name: String,

    /// Per-direction frame capacity in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    pub frame_bytes: u64,
}

#[derive(Parser, Debug)]
pub struct BulkUnlinkArgs {
    /// Channel name
    #[arg(long)]
    pub name: String,
}
