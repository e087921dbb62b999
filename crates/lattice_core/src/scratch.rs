//! Dense window of lattice values around the cell being solved.
//!
//! The window spans `2·reach + 1` cells per ordinate and is addressed by
//! `OffsetKey` relative to its centre. It is owned by one solve, refilled from
//! a `Field` before each cell, and is what the Newton driver iterates against.

use crate::error::StoreError;
use crate::expression::{CellSource, Node};
use crate::grid::Field;
use crate::lattice::{OffsetKey, Ordinate};
use crate::newton::IterationHooks;

#[derive(Debug, Clone)]
pub struct ScratchWindow {
    reach: [usize; 4],
    dims: [usize; 4],
    values: Vec<f64>,
    spare: Vec<f64>,
    center: [usize; 4],
    extent: [usize; 4],
    unknown: OffsetKey,
    boundary: f64,
    saved_correction: Option<f64>,
    reads: usize,
}

impl ScratchWindow {
    /// Cells outside the field read as `boundary`.
    pub fn new(reach: [usize; 4], unknown: OffsetKey, boundary: f64) -> Self {
        for ordinate in Ordinate::ALL {
            assert!(
                unknown.reach(ordinate) as usize <= reach[ordinate.index()],
                "unknown {unknown} lies outside a window of reach {reach:?}"
            );
        }
        let dims: [usize; 4] = std::array::from_fn(|i| 2 * reach[i] + 1);
        let len = dims.iter().product();
        Self {
            reach,
            dims,
            values: vec![boundary; len],
            spare: vec![boundary; len],
            center: [0; 4],
            extent: [0; 4],
            unknown,
            boundary,
            saved_correction: None,
            reads: 0,
        }
    }

    /// Smallest window holding every cell `expression` reads plus `unknown`.
    pub fn for_expression(expression: &Node<f64>, unknown: OffsetKey, boundary: f64) -> Self {
        let expr_reach = expression.reach();
        let reach = std::array::from_fn(|i| {
            (expr_reach[i] as usize).max(unknown.reach(Ordinate::ALL[i]) as usize)
        });
        Self::new(reach, unknown, boundary)
    }

    pub fn reach(&self) -> [usize; 4] {
        self.reach
    }

    pub fn center(&self) -> [usize; 4] {
        self.center
    }

    pub fn unknown(&self) -> OffsetKey {
        self.unknown
    }

    /// Field reads performed by `fill` and `shift` so far.
    pub fn grid_reads(&self) -> usize {
        self.reads
    }

    /// Grid coordinate of `offset`, or `None` outside the field.
    pub fn coordinate_of(&self, offset: &OffsetKey) -> Option<[usize; 4]> {
        let components = offset.components();
        let mut coord = [0usize; 4];
        for i in 0..4 {
            let c = self.center[i] as i64 + components[i] as i64;
            if c < 0 || c >= self.extent[i] as i64 {
                return None;
            }
            coord[i] = c as usize;
        }
        Some(coord)
    }

    pub fn get(&self, offset: &OffsetKey) -> f64 {
        self.values[self.index_of(offset)]
    }

    pub fn set(&mut self, offset: &OffsetKey, value: f64) {
        let index = self.index_of(offset);
        self.values[index] = value;
    }

    /// Reads the whole window centred on `center`.
    pub fn fill(&mut self, field: &mut dyn Field, center: [usize; 4]) -> Result<(), StoreError> {
        self.center = center;
        self.extent = field.extent();
        self.saved_correction = None;
        for index in 0..self.values.len() {
            let offset = self.offset_at(index);
            let value = self.read(field, &offset)?;
            self.values[index] = value;
        }
        Ok(())
    }

    /// Moves the centre one cell along `ordinate`, keeping the overlapping
    /// values and reading only the newly exposed face.
    pub fn shift(
        &mut self,
        field: &mut dyn Field,
        ordinate: Ordinate,
        delta: i32,
    ) -> Result<(), StoreError> {
        assert!(
            delta == 1 || delta == -1,
            "shift moves one cell, got {delta}"
        );
        let axis = ordinate.index();
        let moved = self.center[axis] as i64 + delta as i64;
        assert!(moved >= 0, "shift would move the centre below zero");
        self.center[axis] = moved as usize;
        self.extent = field.extent();
        self.saved_correction = None;

        let reach = self.reach[axis] as i32;
        for index in 0..self.spare.len() {
            let offset = self.offset_at(index);
            let source = offset.get(ordinate) + delta;
            let value = if source.abs() <= reach {
                self.values[self.index_of(&offset.shifted(ordinate, delta))]
            } else {
                self.read(field, &offset)?
            };
            self.spare[index] = value;
        }
        std::mem::swap(&mut self.values, &mut self.spare);
        Ok(())
    }

    /// Writes the unknown's current value back to the field.
    pub fn write_unknown(&self, field: &mut dyn Field) -> Result<[usize; 4], StoreError> {
        let coord = self.coordinate_of(&self.unknown).ok_or(StoreError::OutOfBounds {
            coord: self.offset_coordinate_unchecked(&self.unknown),
            extent: self.extent,
        })?;
        field.set_at(coord, self.get(&self.unknown))?;
        Ok(coord)
    }

    fn offset_coordinate_unchecked(&self, offset: &OffsetKey) -> [usize; 4] {
        let components = offset.components();
        std::array::from_fn(|i| (self.center[i] as i64 + components[i] as i64).max(0) as usize)
    }

    fn read(&mut self, field: &mut dyn Field, offset: &OffsetKey) -> Result<f64, StoreError> {
        match self.coordinate_of(offset) {
            Some(coord) => {
                self.reads += 1;
                field.get_at(coord)
            }
            None => Ok(self.boundary),
        }
    }

    fn index_of(&self, offset: &OffsetKey) -> usize {
        let components = offset.components();
        let mut index = 0;
        for i in 0..4 {
            let local = components[i] + self.reach[i] as i32;
            assert!(
                local >= 0 && (local as usize) < self.dims[i],
                "offset {offset} is outside the scratch window (reach {:?})",
                self.reach
            );
            index = index * self.dims[i] + local as usize;
        }
        index
    }

    fn offset_at(&self, mut index: usize) -> OffsetKey {
        let mut components = [0i32; 4];
        for i in (0..4).rev() {
            components[i] = (index % self.dims[i]) as i32 - self.reach[i] as i32;
            index /= self.dims[i];
        }
        let [t, x, y, z] = components;
        OffsetKey::new(t, x, y, z)
    }
}

impl CellSource<f64> for ScratchWindow {
    fn cell(&self, key: &OffsetKey) -> f64 {
        self.get(key)
    }
}

impl IterationHooks<f64> for ScratchWindow {
    fn cells(&self) -> &dyn CellSource<f64> {
        self
    }

    fn read_current_guess(&self) -> f64 {
        self.get(&self.unknown)
    }

    fn apply_iteration_offset(&mut self, offset: &f64) {
        let unknown = self.unknown;
        let value = self.get(&unknown) + offset;
        self.set(&unknown, value);
    }

    /// Replaces the current time slot with the mean of the slots before and
    /// after it, i.e. averages the two most recent per-step slopes. Only the
    /// window copy changes, and `restore_correction_slot` puts the original
    /// back before `write_unknown` runs, so slab `t` in the field is never
    /// touched.
    fn cache_correction_slot(&mut self) -> bool {
        let next = OffsetKey::along(Ordinate::T, 1);
        if self.unknown != next || self.reach[Ordinate::T.index()] == 0 {
            return false;
        }
        let previous = OffsetKey::along(Ordinate::T, -1);
        if self.coordinate_of(&previous).is_none() {
            return false;
        }
        let original = self.get(&OffsetKey::ORIGIN);
        let corrected = 0.5 * (self.get(&previous) + self.get(&next));
        self.saved_correction = Some(original);
        self.set(&OffsetKey::ORIGIN, corrected);
        true
    }

    fn restore_correction_slot(&mut self) {
        if let Some(original) = self.saved_correction.take() {
            self.set(&OffsetKey::ORIGIN, original);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DenseGrid;

    fn sample_grid(extent: [usize; 4]) -> DenseGrid {
        let mut grid = DenseGrid::new(extent);
        for t in 0..extent[0] {
            for x in 0..extent[1] {
                for y in 0..extent[2] {
                    for z in 0..extent[3] {
                        let v = (t * 1000 + x * 100 + y * 10 + z) as f64;
                        grid.set(t, x, y, z, v).expect("in bounds");
                    }
                }
            }
        }
        grid
    }

    fn next_t() -> OffsetKey {
        OffsetKey::along(Ordinate::T, 1)
    }

    #[test]
    fn fill_reads_window_and_pads_with_boundary() {
        let mut grid = sample_grid([3, 4, 4, 4]);
        let mut window = ScratchWindow::new([1, 1, 1, 1], next_t(), -1.0);
        window.fill(&mut grid, [1, 0, 2, 3]).expect("fill");

        assert_eq!(window.get(&OffsetKey::ORIGIN), 1023.0);
        assert_eq!(window.get(&OffsetKey::new(1, 1, -1, 0)), 2113.0);
        assert_eq!(window.get(&OffsetKey::along(Ordinate::X, -1)), -1.0);
        assert_eq!(window.get(&OffsetKey::along(Ordinate::Z, 1)), -1.0);
        // 81 cells, minus the x = -1 plane (27) and the z = 4 plane (27),
        // plus their overlap (9).
        assert_eq!(window.grid_reads(), 36);
    }

    #[test]
    fn shift_matches_a_fresh_fill() {
        let mut grid = sample_grid([3, 5, 5, 5]);
        let mut shifted = ScratchWindow::new([1, 1, 1, 1], next_t(), 0.0);
        shifted.fill(&mut grid, [1, 2, 2, 2]).expect("fill");

        let moves = [
            (Ordinate::Z, 1),
            (Ordinate::Y, -1),
            (Ordinate::X, 1),
            (Ordinate::Z, 1),
        ];
        for (ordinate, delta) in moves {
            let before = shifted.grid_reads();
            shifted.shift(&mut grid, ordinate, delta).expect("shift");
            assert!(shifted.grid_reads() - before <= 27, "only one face is read");

            let mut fresh = ScratchWindow::new([1, 1, 1, 1], next_t(), 0.0);
            fresh.fill(&mut grid, shifted.center()).expect("fill");
            assert_eq!(
                shifted.values, fresh.values,
                "after shifting {ordinate} by {delta}"
            );
        }
        assert_eq!(shifted.center(), [1, 3, 1, 4]);
    }

    #[test]
    fn iteration_hooks_update_the_unknown() {
        let mut grid = sample_grid([3, 3, 3, 3]);
        let mut window = ScratchWindow::new([1, 1, 1, 1], next_t(), 0.0);
        window.fill(&mut grid, [1, 1, 1, 1]).expect("fill");
        assert_eq!(window.read_current_guess(), 2111.0);
        window.apply_iteration_offset(&-11.0);
        assert_eq!(window.read_current_guess(), 2100.0);

        let coord = window.write_unknown(&mut grid).expect("write back");
        assert_eq!(coord, [2, 1, 1, 1]);
        assert_eq!(grid.get(2, 1, 1, 1).expect("in bounds"), 2100.0);
    }

    #[test]
    fn correction_slot_averages_neighbouring_steps() {
        let mut grid = sample_grid([3, 3, 3, 3]);
        let mut window = ScratchWindow::new([1, 1, 1, 1], next_t(), 0.0);
        window.fill(&mut grid, [1, 1, 1, 1]).expect("fill");

        assert!(window.cache_correction_slot());
        assert_eq!(window.get(&OffsetKey::ORIGIN), 0.5 * (111.0 + 2111.0));
        window.restore_correction_slot();
        assert_eq!(window.get(&OffsetKey::ORIGIN), 1111.0);

        window.fill(&mut grid, [0, 1, 1, 1]).expect("fill");
        assert!(!window.cache_correction_slot(), "no step before t = 0");
    }

    #[test]
    fn window_sized_from_expression() {
        let expr = Node::<f64>::cell(OffsetKey::new(-1, 2, 0, 0));
        let window = ScratchWindow::for_expression(&expr, next_t(), 0.0);
        assert_eq!(window.reach(), [1, 2, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "outside the scratch window")]
    fn reading_outside_the_window_panics() {
        let window = ScratchWindow::new([1, 1, 0, 0], next_t(), 0.0);
        window.get(&OffsetKey::along(Ordinate::Y, 1));
    }
}
