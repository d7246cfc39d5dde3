//! CLI argument definitions using clap.

use clap::{Parser, Subcommand};
use eyre::Result;

#[derive(Debug, Parser)]
#[command(name = "artlab")]
#[command(about = "Import speech articulation recordings, derive metrics, save the results")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import or load a session, derive the requested metrics and save
    Process(crate::process::Args),

    /// List a session's recordings, modalities and statistics
    Info(crate::info::Args),
}

/// Execute CLI command - separated for testing.
pub fn run(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::Process(args) => crate::process::execute(args.try_into()?),
        Commands::Info(args) => crate::info::execute(args.try_into()?),
    }
}
