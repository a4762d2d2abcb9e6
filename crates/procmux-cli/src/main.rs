//! procmux CLI - persistent interpreter sessions and bulk channel tools
//!
//! This is the CLI binary that uses the procmux library for interpreter
//! multiplexing and shared-memory transfers.

mod cli;

use clap::Parser;
use cli::{BulkCommands, BulkDirection, Cli, Commands, RunArgs, ShellArgs};
use colored::Colorize;
use procmux::{BulkChannel, Direction, EngineConfig, ProcmuxError, Result, ShellEngine};
use std::io::{BufRead, Read, Write};
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            eprintln!("procmux: {}", e.to_string().red());
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => run_command(args, cli.quiet),
        Commands::Shell(args) => run_shell(args, cli.quiet),
        Commands::Bulk(bulk) => run_bulk(bulk),
    }
}

fn run_shell(args: ShellArgs, quiet: bool) -> Result<i32> {
    let mut config = EngineConfig {
        interpreter_path: args.interpreter.clone(),
        timeout_seconds: args.timeout,
        auto_restart_on_timeout: args.auto_restart,
        ..EngineConfig::default()
    };
    if let Some(workdir) = &args.workdir {
        config.working_directory = workdir.clone();
    }

    let engine = ShellEngine::new(config);
    engine.start()?;
    if !quiet {
        eprintln!("procmux shell - one command per line, Ctrl-D to exit");
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(ProcmuxError::Io)?;
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command == "exit" {
            break;
        }

        let result = engine.execute(command.to_string(), args.timeout);
        std::io::stdout()
            .write_all(&result.stdout)
            .map_err(ProcmuxError::Io)?;
        std::io::stderr()
            .write_all(&result.stderr)
            .map_err(ProcmuxError::Io)?;
        if !quiet && !result.success {
            eprintln!(
                "{}",
                format!("command failed (exit {})", result.exit_code).red()
            );
        }
    }

    engine.stop(false);
    Ok(0)
}

fn run_command(args: RunArgs, quiet: bool) -> Result<i32> {
    let mut config = EngineConfig {
        interpreter_path: args.interpreter.clone(),
        timeout_seconds: args.timeout,
        auto_restart_on_timeout: false,
        startup_commands: args.startup.clone(),
        ..EngineConfig::default()
    };
    if let Some(workdir) = &args.workdir {
        config.working_directory = workdir.clone();
    }
    for pair in &args.env {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(ProcmuxError::InvalidArg(format!(
                "--env expects KEY=VALUE, got '{pair}'"
            )));
        };
        config.environment.insert(key.to_string(), value.to_string());
    }

    let engine = ShellEngine::new(config);
    engine.start()?;

    let command = args.command.join(" ");
    let result = engine.execute(command, args.timeout);
    engine.stop(false);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result)
                .map_err(|e| ProcmuxError::System(format!("failed to serialize result: {e}")))?
        );
    } else {
        std::io::stdout()
            .write_all(&result.stdout)
            .map_err(ProcmuxError::Io)?;
        std::io::stderr()
            .write_all(&result.stderr)
            .map_err(ProcmuxError::Io)?;
        if !quiet && !result.success {
            eprintln!(
                "{}",
                format!("command failed (exit {})", result.exit_code).red()
            );
        }
    }

    Ok(if result.success { 0 } else { 1 })
}

fn run_bulk(command: BulkCommands) -> Result<i32> {
    match command {
        BulkCommands::Write(args) => {
            let mut payload = Vec::new();
            std::io::stdin()
                .read_to_end(&mut payload)
                .map_err(ProcmuxError::Io)?;

            let mut channel = BulkChannel::open(&args.name, args.frame_bytes)?;
            let timeout = Duration::from_millis(args.timeout_ms);
            match args.chunk_size {
                Some(chunk_size) => {
                    let chunks = channel.write_chunked(
                        direction_of(args.direction),
                        &payload,
                        chunk_size,
                        timeout,
                    )?;
                    eprintln!("sent {} bytes in {chunks} chunks", payload.len());
                }
                None => {
                    let seq = channel.write(direction_of(args.direction), &payload, timeout)?;
                    eprintln!("sent {} bytes, sequence {seq}", payload.len());
                }
            }
            Ok(0)
        }
        BulkCommands::Read(args) => {
            let mut channel = BulkChannel::open(&args.name, args.frame_bytes)?;
            let timeout = Duration::from_millis(args.timeout_ms);
            let payload = if args.chunked {
                channel.read_chunked(direction_of(args.direction), timeout)?
            } else {
                let mut buf = vec![0u8; args.frame_bytes as usize];
                let length =
                    channel.read_into(direction_of(args.direction), &mut buf, timeout)?;
                buf.truncate(length as usize);
                buf
            };
            std::io::stdout()
                .write_all(&payload)
                .map_err(ProcmuxError::Io)?;
            Ok(0)
        }
        BulkCommands::Header(args) => {
            let channel = BulkChannel::open(&args.name, args.frame_bytes)?;
            let header = channel.header();
            println!("magic:        {:#010x}", header.magic);
            println!("version:      {}", header.version);
            println!("frame_bytes:  {}", header.frame_bytes);
            println!("a2b_seq:      {}", header.host_to_shell_seq);
            println!("b2a_seq:      {}", header.shell_to_host_seq);
            println!("a2b_length:   {}", header.host_to_shell_length);
            println!("b2a_length:   {}", header.shell_to_host_length);
            Ok(0)
        }
        BulkCommands::Unlink(args) => {
            BulkChannel::unlink(&args.name);
            Ok(0)
        }
    }
}

fn direction_of(direction: BulkDirection) -> Direction {
    match direction {
        BulkDirection::ToShell => Direction::HostToShell,
        BulkDirection::FromShell => Direction::ShellToHost,
    }
}
