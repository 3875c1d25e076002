// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `skytest`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "skytest",
    version,
    about = "Run tagged integration-test suites against ephemeral cloud clusters.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Skytest.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Skytest.toml")]
    pub config: String,

    /// Restrict the run to the named cluster providers.
    ///
    /// May be given multiple times. When omitted, all configured providers
    /// participate.
    #[arg(long = "cluster", value_name = "NAME")]
    pub clusters: Vec<String>,

    /// Cap the instance pool of every provider at this size.
    #[arg(long, value_name = "N")]
    pub count: Option<usize>,

    /// Run only providers and executions explicitly marked `enabled = true`.
    #[arg(long)]
    pub only_enabled: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SKYTEST_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the run plan, but don't provision anything.
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

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
