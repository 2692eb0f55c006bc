// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `shflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "shflow",
    version,
    about = "Run task scripts on local, SSH and cluster executioners, with checkpoint/restart.",
    long_about = None
)]
pub struct CliArgs {
    /// Compiled program (JSON) to run. Not needed with `--recover`.
    #[arg(value_name = "PROGRAM", required_unless_present = "recover")]
    pub program: Option<PathBuf>,

    /// Path to the config file (TOML).
    ///
    /// Default: `shflow.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Continue a program from a checkpoint file.
    #[arg(long, value_name = "CHECKPOINT", conflicts_with = "program")]
    pub recover: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SHFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Interpret the program but don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,

    /// Never write checkpoint files.
    #[arg(long)]
    pub no_checkpoint: bool,

    /// Arguments made available to the program as `args`.
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
