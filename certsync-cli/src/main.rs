//! certsync aggregates TLS certificates from importers and fans changes out
//! to exporters.
//!
//! # Usage
//!
//! ```text
//! certsync run --config <path> [--log-json]
//! certsync adapters [--json]
//! certsync check-config --config <path>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{adapters::AdaptersArgs, check_config::CheckConfigArgs, run::RunArgs};

#[derive(Parser, Debug)]
#[command(
    name = "certsync",
    version,
    about = "Track TLS certificates across sources and keep consumers in sync",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run importers and exporters until interrupted.
    Run(RunArgs),

    /// List built-in importers and exporters with their options.
    Adapters(AdaptersArgs),

    /// Load a configuration file and report which adapters would run.
    CheckConfig(CheckConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Adapters(args) => args.run(),
        Commands::CheckConfig(args) => args.run(),
    }
}
