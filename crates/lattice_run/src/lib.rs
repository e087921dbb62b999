//! Wave-equation harness around `lattice_core`: seeds a field, marches it with
//! Newton–Raphson per cell, and summarizes the run.

pub mod config;
pub mod wave;

use anyhow::{Context, Result};
use config::{RunConfig, Storage};
use lattice_core::grid::{DenseGrid, Field, GridStore, StoreStats};
use lattice_core::lattice::{OffsetKey, Ordinate};
use lattice_core::march::{SlabReport, TimeMarcher};
use lattice_core::stencil::Discretizer;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub slabs: Vec<SlabReport>,
    /// Last time slab, `(x, y, z)` row-major.
    pub final_slab: Vec<f64>,
    /// Against the closed form, when there is one.
    pub max_error: Option<f64>,
    pub total_iterations: usize,
    pub unconverged: usize,
    pub store: Option<StoreStats>,
}

pub fn run(config: &RunConfig) -> Result<RunSummary> {
    config.validate()?;
    let axes = wave::spatial_ordinates(config);
    info!(
        extent = ?config.extent,
        axes = axes.len(),
        "starting wave run"
    );

    match &config.storage {
        Storage::Memory => {
            let mut grid = DenseGrid::new(config.extent);
            march(config, &mut grid)
        }
        Storage::Disk {
            location,
            max_resident,
        } => {
            let store_config = config.store_config(location.clone(), *max_resident);
            GridStore::scoped(store_config, |store| -> Result<RunSummary> {
                let mut summary = march(config, store)?;
                summary.store = Some(store.stats());
                Ok(summary)
            })
            .with_context(|| format!("Disk-backed run in {} failed", location.display()))
        }
    }
}

fn march(config: &RunConfig, field: &mut dyn Field) -> Result<RunSummary> {
    wave::seed(config, field).context("Failed to seed the initial slabs")?;

    let equation = wave::wave_equation(config.wave_speed, &wave::spatial_ordinates(config));
    let discretizer = Discretizer::from_real(config.steps);
    let unknown = OffsetKey::along(Ordinate::T, 1);
    let mut marcher = TimeMarcher::new(&equation, &discretizer, unknown, config.march)
        .context("Failed to prepare the time marcher")?;

    let last = config.extent[0] - 1;
    let slabs = marcher
        .run(field, 1..last, config.swatch)
        .context("Time march failed")?;

    let final_slab = wave::read_slab(config, field, last)?;
    let max_error = wave::max_error(config, &final_slab, last);
    let total_iterations = slabs.iter().map(|s| s.iterations).sum();
    let unconverged = slabs.iter().map(|s| s.unconverged).sum();
    info!(
        total_iterations,
        unconverged,
        max_error = ?max_error,
        "wave run complete"
    );

    Ok(RunSummary {
        slabs,
        final_slab,
        max_error,
        total_iterations,
        unconverged,
        store: None,
    })
}
