//! JSON run configuration.

use anyhow::{bail, Context, Result};
use lattice_core::grid::GridStoreConfig;
use lattice_core::march::MarchSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitialCondition {
    /// `A · Π sin(mπx/L)` with zero boundaries; has a closed-form solution.
    StandingWave {
        modes: [usize; 3],
        amplitude: f64,
    },
    /// Gaussian bump at rest, centred in physical coordinates.
    Pulse {
        center: [f64; 3],
        width: f64,
        amplitude: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Storage {
    Memory,
    Disk {
        location: PathBuf,
        max_resident: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub wave_speed: f64,
    /// `(dt, dx, dy, dz)`
    pub steps: [f64; 4],
    /// Time slabs, then cells per spatial axis. Axes of extent 1 are inactive.
    pub extent: [usize; 4],
    pub swatch: [usize; 4],
    pub initial: InitialCondition,
    pub storage: Storage,
    pub march: MarchSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            wave_speed: 1.0,
            steps: [1.0 / 64.0, 1.0 / 32.0, 1.0 / 32.0, 1.0 / 32.0],
            extent: [20, 31, 1, 1],
            swatch: [1, 8, 8, 8],
            initial: InitialCondition::StandingWave {
                modes: [1, 1, 1],
                amplitude: 1.0,
            },
            storage: Storage::Memory,
            march: MarchSettings::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run config {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse run config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.wave_speed <= 0.0 {
            bail!("wave_speed must be positive.");
        }
        if self.steps.iter().any(|&h| h <= 0.0) {
            bail!("All lattice steps must be positive, got {:?}.", self.steps);
        }
        if self.extent[0] < 3 {
            bail!(
                "At least three time slabs are needed, got {}.",
                self.extent[0]
            );
        }
        if self.spatial_axes().is_empty() {
            bail!("At least one spatial axis needs an extent above one.");
        }
        let inverse_squares: f64 = self
            .spatial_axes()
            .iter()
            .map(|&i| self.steps[i].powi(-2))
            .sum();
        let courant = self.wave_speed * self.steps[0] * inverse_squares.sqrt();
        if courant > 1.0 {
            bail!("Courant number {courant:.3} exceeds one; reduce dt.");
        }
        Ok(())
    }

    /// Indices `1..=3` of the spatial axes with more than one cell.
    pub fn spatial_axes(&self) -> Vec<usize> {
        (1..4).filter(|&i| self.extent[i] > 1).collect()
    }

    pub fn store_config(&self, location: PathBuf, max_resident: usize) -> GridStoreConfig {
        GridStoreConfig {
            extent: self.extent,
            swatch: self.swatch,
            location,
            max_resident,
        }
    }
}
