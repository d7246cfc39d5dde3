//! Info subcommand - list a session's contents without deriving anything.

use std::path::PathBuf;

use artlab_core::store;
use eyre::{Result, WrapErr};

/// CLI arguments for the info subcommand.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Session directory: a vendor export or a previously saved session
    pub directory: PathBuf,
}

/// Resolved configuration for the info subcommand.
#[derive(Debug)]
pub struct Config {
    pub directory: PathBuf,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        Ok(Self {
            directory: args.directory,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let session = store::load_or_import(&config.directory)
        .wrap_err_with(|| format!("failed to open session {:?}", config.directory.display()))?;

    println!(
        "session {} ({}): {} recordings",
        session.name(),
        session.data_source(),
        session.len()
    );

    for recording in &session {
        let meta = recording.meta_data();
        let flag = if recording.excluded() {
            " [excluded]"
        } else {
            ""
        };
        println!(
            "  {} | {} | {}{}",
            meta.basename, meta.prompt, meta.time_of_recording, flag
        );
        for modality in recording.modalities() {
            let state = if modality.data().is_some() {
                "loaded"
            } else {
                "on demand"
            };
            println!("    modality: {} ({state})", modality.name());
        }
        for statistic in recording.statistics() {
            println!("    statistic: {}", statistic.name());
        }
    }

    for statistic in session.statistics() {
        println!("  session statistic: {}", statistic.name());
    }

    Ok(())
}
