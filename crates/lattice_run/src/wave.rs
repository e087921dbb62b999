//! Wave equation `u_tt = c² ∇²u` with zero Dirichlet boundaries.
//!
//! Cell `i` along an axis sits at `(i + 1)·h`; the boundary cells at `i = -1`
//! and `i = n` are the scratch window's boundary value, so the physical length
//! is `(n + 1)·h`.

use crate::config::{InitialCondition, RunConfig};
use anyhow::Result;
use lattice_core::expression::Node;
use lattice_core::grid::Field;
use lattice_core::lattice::Ordinate;
use std::f64::consts::PI;

/// Residual `u_tt − c² Σ u_oo` over the given spatial ordinates.
pub fn wave_equation(c: f64, axes: &[Ordinate]) -> Node<f64> {
    let u = Node::unknown();
    let u_tt = Node::apply_partial([Ordinate::T, Ordinate::T], u.clone());
    let laplacian = axes
        .iter()
        .map(|&o| Node::apply_partial([o, o], u.clone()))
        .fold(Node::zero(), Node::sum);
    u_tt - Node::product(Node::real(c * c), laplacian)
}

pub fn spatial_ordinates(config: &RunConfig) -> Vec<Ordinate> {
    config
        .spatial_axes()
        .into_iter()
        .map(|i| Ordinate::ALL[i])
        .collect()
}

fn position(config: &RunConfig, axis: usize, index: usize) -> f64 {
    (index + 1) as f64 * config.steps[axis]
}

fn length(config: &RunConfig, axis: usize) -> f64 {
    (config.extent[axis] + 1) as f64 * config.steps[axis]
}

/// Closed-form value at `(t, x, y, z)`, if the initial condition has one.
pub fn analytic(config: &RunConfig, coord: [usize; 4]) -> Option<f64> {
    let InitialCondition::StandingWave { modes, amplitude } = &config.initial else {
        return None;
    };
    let mut shape = *amplitude;
    let mut wavenumber_sq = 0.0;
    for axis in config.spatial_axes() {
        let k = modes[axis - 1] as f64 * PI / length(config, axis);
        shape *= (k * position(config, axis, coord[axis])).sin();
        wavenumber_sq += k * k;
    }
    let omega = config.wave_speed * wavenumber_sq.sqrt();
    let t = coord[0] as f64 * config.steps[0];
    Some(shape * (omega * t).cos())
}

fn initial_value(config: &RunConfig, coord: [usize; 4]) -> f64 {
    match &config.initial {
        InitialCondition::StandingWave { .. } => analytic(config, coord).unwrap_or(0.0),
        InitialCondition::Pulse {
            center,
            width,
            amplitude,
        } => {
            let r_sq: f64 = config
                .spatial_axes()
                .into_iter()
                .map(|axis| {
                    let d = position(config, axis, coord[axis]) - center[axis - 1];
                    d * d
                })
                .sum();
            amplitude * (-r_sq / (width * width)).exp()
        }
    }
}

/// Writes the first two time slabs, which leapfrog needs to start.
pub fn seed(config: &RunConfig, field: &mut dyn Field) -> Result<()> {
    let [_, nx, ny, nz] = config.extent;
    for t in 0..2 {
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    let coord = [t, x, y, z];
                    field.set_at(coord, initial_value(config, coord))?;
                }
            }
        }
    }
    Ok(())
}

/// Reads slab `t` in `(x, y, z)` row-major order.
pub fn read_slab(config: &RunConfig, field: &mut dyn Field, t: usize) -> Result<Vec<f64>> {
    let [_, nx, ny, nz] = config.extent;
    let mut values = Vec::with_capacity(nx * ny * nz);
    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                values.push(field.get(t, x, y, z)?);
            }
        }
    }
    Ok(values)
}

/// Largest deviation of slab `t` from the closed form.
pub fn max_error(config: &RunConfig, slab: &[f64], t: usize) -> Option<f64> {
    let [_, nx, ny, nz] = config.extent;
    let mut worst: f64 = 0.0;
    let mut i = 0;
    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                let exact = analytic(config, [t, x, y, z])?;
                worst = worst.max((slab[i] - exact).abs());
                i += 1;
            }
        }
    }
    Some(worst)
}
