// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `dagcron`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagcron",
    version,
    about = "Schedule dependency-ordered jobs onto remote nodes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Dagcron.toml")]
    pub config: String,

    /// Start the runs that are due right now (plus any `--trigger`), then
    /// exit when they are done.
    #[arg(long)]
    pub once: bool,

    /// Trigger a run of this job at startup (may be repeated).
    #[arg(long, value_name = "JOB")]
    pub trigger: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGCRON_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print jobs and their first commands, but don't
    /// execute anything.
    #[arg(long)]
    pub dry_run: bool,
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

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
