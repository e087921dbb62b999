//! lattice-run
//!
//! Marches a wave equation described by a JSON run config.
//!
//! Usage: `lattice-run <config.json> [--slabs N] [--store DIR] [--output FILE]`

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use lattice_run::config::{RunConfig, Storage};

#[derive(Parser, Debug)]
#[command(name = "lattice-run")]
#[command(about = "March a wave equation on a lattice, in memory or out of core")]
struct Args {
    /// Path to the JSON run config
    config: PathBuf,

    /// Override the number of time slabs
    #[arg(long)]
    slabs: Option<usize>,

    /// Run disk-backed with swatches under this directory
    #[arg(long)]
    store: Option<PathBuf>,

    /// Resident swatch limit when --store is given
    #[arg(long, default_value = "64")]
    max_resident: usize,

    /// Write the JSON summary here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lattice_run=info,lattice_core=info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = RunConfig::load(&args.config)?;
    if let Some(slabs) = args.slabs {
        config.extent[0] = slabs;
    }
    if let Some(location) = args.store {
        config.storage = Storage::Disk {
            location,
            max_resident: args.max_resident,
        };
    }

    let summary = lattice_run::run(&config)?;
    if summary.unconverged > 0 {
        warn!(
            cells = summary.unconverged,
            "some cells were accepted without converging"
        );
    }
    if let Some(error) = summary.max_error {
        info!(
            max_error = error,
            "compared against the closed-form solution"
        );
    }

    let json = serde_json::to_string_pretty(&summary).context("Failed to encode run summary")?;
    match args.output {
        Some(path) => fs::write(&path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
