#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Harmonises mapped and registered PV installations and reports capacity
//! per region.
//!
//! Uses `indicatif-log-bridge` (via [`pvgeo_cli_utils::init_logger`]) so
//! log lines and progress bars share the terminal.

mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::PipelineConfig;

#[derive(Parser)]
#[command(name = "pvgeo", about = "PV installation harmonisation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage and write the merged layer and regional reports
    Run {
        #[arg(long, default_value = "pvgeo.toml")]
        config: PathBuf,
    },
    /// Show geometry types of the mapping layer before and after repair
    Inspect {
        #[arg(long, default_value = "pvgeo.toml")]
        config: PathBuf,
    },
    /// Fit the area and module-count capacity regressions only
    Regress {
        #[arg(long, default_value = "pvgeo.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = pvgeo_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = PipelineConfig::load(&config)?;
            pipeline::run(&config, &multi)?;
        }
        Commands::Inspect { config } => {
            let config = PipelineConfig::load(&config)?;
            pipeline::inspect(&config)?;
        }
        Commands::Regress { config } => {
            let config = PipelineConfig::load(&config)?;
            pipeline::regress(&config, &multi)?;
        }
    }

    Ok(())
}
