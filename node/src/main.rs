// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # BIOGATE Operator Tool
//!
//! Entry point for the `biogate-node` binary. Parses CLI arguments,
//! initializes logging, and dispatches to a subcommand:
//!
//! - `replay`: apply an operation script to an in-memory vault
//! - `version`: print build version information

mod cli;
mod logging;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;

use biogate_protocol::GateConfig;

use cli::{BiogateCli, Commands, ReplayArgs};

fn main() -> Result<()> {
    let cli = BiogateCli::parse();

    match cli.command {
        Commands::Replay(args) => {
            logging::init_logging(&logging::default_directive(&cli.log_level), cli.log_format);
            replay(args)
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Loads config and script, runs the replay, and prints the JSON report.
fn replay(args: ReplayArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => GateConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GateConfig::default(),
    };

    let raw = std::fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read script {}", args.script.display()))?;
    let steps = scenario::parse_script(&raw)
        .with_context(|| format!("failed to parse script {}", args.script.display()))?;

    tracing::info!(
        script = %args.script.display(),
        steps = steps.len(),
        admin = %config.admin,
        "starting replay"
    );

    let report = scenario::run_script(config, &steps, args.fail_fast)?;
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", rendered);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("biogate-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", biogate_protocol::config::PROTOCOL_VERSION);
}
