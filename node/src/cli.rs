//! # CLI Interface
//!
//! Defines the command-line argument structure for `biogate-node` using
//! `clap` derive. Two subcommands: `replay` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// BIOGATE operator tool.
///
/// Replays scripted vault operations against an in-memory instance and
/// reports the resulting state. Useful for rehearsing release flows and for
/// reproducing incidents from an operation log.
#[derive(Parser, Debug)]
#[command(
    name = "biogate-node",
    about = "BIOGATE operator tool",
    version,
    propagate_version = true
)]
pub struct BiogateCli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Log level for BIOGATE crates when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply a JSON script of operations to a fresh vault and print a report.
    Replay(ReplayArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `replay` subcommand.
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Path to the operation script (a JSON array of steps).
    #[arg(long, short = 's')]
    pub script: PathBuf,

    /// Path to the vault configuration file (JSON).
    ///
    /// When omitted, defaults apply with `admin` as the administrator.
    #[arg(long, short = 'c', env = "BIOGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Stop at the first failing step instead of recording it and moving on.
    #[arg(long)]
    pub fail_fast: bool,

    /// Pretty-print the JSON report.
    #[arg(long)]
    pub pretty: bool,
}
