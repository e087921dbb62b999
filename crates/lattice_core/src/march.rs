//! Advances a discretized PDE one time slab at a time.
//!
//! For every spatial cell of a slab, in swatch-local snake order, the scratch
//! window is shifted or refilled, Newton–Raphson solves for the unknown cell
//! and the converged value is written back to the field.

use crate::error::{ExprError, SolveError, StoreError};
use crate::expression::{ImplicitSpace, Node};
use crate::grid::{Field, Movement, Traversal};
use crate::lattice::{OffsetKey, Ordinate};
use crate::newton::{NewtonRaphson, NewtonSettings};
use crate::scratch::ScratchWindow;
use crate::stencil::Discretizer;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MarchSettings {
    pub newton: NewtonSettings,
    /// Value of every cell outside the field.
    pub boundary_value: f64,
    /// Start each solve from the cell's current value instead of whatever
    /// the field holds at the unknown's position.
    pub seed_from_previous: bool,
}

impl Default for MarchSettings {
    fn default() -> Self {
        Self {
            newton: NewtonSettings::default(),
            boundary_value: 0.0,
            seed_from_previous: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlabReport {
    /// Time index of the slab the window was centred on.
    pub t: usize,
    pub cells: usize,
    pub iterations: usize,
    pub grid_reads: usize,
    pub shifts: usize,
    pub jumps: usize,
    pub unconverged: usize,
    pub max_residual: f64,
}

pub struct TimeMarcher {
    driver: NewtonRaphson<f64>,
    unknown: OffsetKey,
    steps: [Node<f64>; 4],
    binds_ordinates: bool,
    settings: MarchSettings,
}

impl TimeMarcher {
    /// Discretizes `equation` (the residual, `= 0`) and prepares a driver for
    /// the cell at `unknown`, normally one step ahead in `t`.
    pub fn new(
        equation: &Node<f64>,
        discretizer: &Discretizer<f64>,
        unknown: OffsetKey,
        settings: MarchSettings,
    ) -> Result<Self, SolveError> {
        let space = ImplicitSpace::new();
        let discrete = match discretizer.discretize(equation, &space) {
            Err(ExprError::DistributionRequired { context }) => {
                debug!(
                    context,
                    "distributing derivative operators before discretizing"
                );
                discretizer.discretize(&equation.distribute(), &space)?
            }
            other => other?,
        };
        let binds_ordinates = discrete.references_ordinates();
        let driver = NewtonRaphson::new(discrete, Node::cell(unknown), space, settings.newton)?;
        Ok(Self {
            driver,
            unknown,
            steps: Ordinate::ALL.map(|o| discretizer.step(o).clone()),
            binds_ordinates,
            settings,
        })
    }

    pub fn driver(&self) -> &NewtonRaphson<f64> {
        &self.driver
    }

    /// Solves every spatial cell of slab `t + unknown.t`, reading slabs around
    /// `t`. `swatch` is the `(t, x, y, z)` swatch geometry used for ordering.
    pub fn advance(
        &mut self,
        field: &mut dyn Field,
        t: usize,
        swatch: [usize; 4],
    ) -> Result<SlabReport, SolveError> {
        let extent = field.extent();
        let target = t as i64 + self.unknown.get(Ordinate::T) as i64;
        if target < 0 || target >= extent[0] as i64 {
            return Err(StoreError::OutOfBounds {
                coord: [target.max(0) as usize, 0, 0, 0],
                extent,
            }
            .into());
        }

        let mut window = ScratchWindow::for_expression(
            self.driver.function(),
            self.unknown,
            self.settings.boundary_value,
        );
        let mut report = SlabReport {
            t,
            ..SlabReport::default()
        };

        for visit in Traversal::for_slab(extent, swatch) {
            let [x, y, z] = visit.cell;
            let center = [t, x, y, z];
            match visit.movement {
                Movement::Shift { ordinate, delta } => {
                    window.shift(field, ordinate, delta)?;
                    report.shifts += 1;
                }
                Movement::Start | Movement::Jump => {
                    window.fill(field, center)?;
                    report.jumps += 1;
                }
            }
            if self.settings.seed_from_previous {
                window.set(&self.unknown, window.get(&OffsetKey::ORIGIN));
            }
            if self.binds_ordinates {
                self.driver.rebind(self.coordinates(center));
            }

            let outcome = self
                .driver
                .solve_corrected(&mut window)
                .map_err(|err| SolveError::AtCell {
                    cell: window.coordinate_of(&self.unknown).unwrap_or(center),
                    source: Box::new(err),
                })?;
            window.write_unknown(field)?;

            report.cells += 1;
            report.iterations += outcome.iterations;
            report.max_residual = report.max_residual.max(outcome.residual);
            if !outcome.converged {
                report.unconverged += 1;
                warn!(
                    cell = ?center,
                    residual = outcome.residual,
                    "accepted unconverged cell"
                );
            }
        }
        report.grid_reads = window.grid_reads();

        info!(
            t,
            cells = report.cells,
            iterations = report.iterations,
            shifts = report.shifts,
            jumps = report.jumps,
            unconverged = report.unconverged,
            "slab complete"
        );
        Ok(report)
    }

    /// `advance` for each `t` in `slabs`, in order.
    pub fn run(
        &mut self,
        field: &mut dyn Field,
        slabs: Range<usize>,
        swatch: [usize; 4],
    ) -> Result<Vec<SlabReport>, SolveError> {
        slabs.map(|t| self.advance(field, t, swatch)).collect()
    }

    /// Binds every ordinate to `index · step` for the cell at `center`.
    fn coordinates(&self, center: [usize; 4]) -> ImplicitSpace<f64> {
        ImplicitSpace::from_bindings(Ordinate::ALL.map(|o| {
            let i = o.index();
            (o, Node::product(Node::real(center[i] as f64), self.steps[i].clone()))
        }))
    }
}
