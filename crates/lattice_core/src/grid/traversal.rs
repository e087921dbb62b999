//! Swatch-local snake order over the spatial cells of one time slab.
//!
//! Swatches are visited in boustrophedon order, and so are the cells inside
//! each swatch, so nearly every step is a unit shift of the scratch window and
//! each swatch is entered exactly once per slab.

use crate::lattice::Ordinate;

/// Boustrophedon walk over a 3-D box: `z` fastest, then `y`, then `x`, each
/// axis reversing direction whenever the next slower axis advances.
#[derive(Debug, Clone)]
pub struct SnakeBox {
    lo: [usize; 3],
    len: [usize; 3],
    ascending: [bool; 3],
    offset: Option<[usize; 3]>,
    done: bool,
}

impl SnakeBox {
    /// Starts at the corner picked by `ascending` (low end where true).
    pub fn new(lo: [usize; 3], len: [usize; 3], ascending: [bool; 3]) -> Self {
        Self {
            lo,
            len,
            ascending,
            offset: None,
            done: len.iter().any(|&n| n == 0),
        }
    }

    /// Starts at whichever corner is nearest to `cell`.
    pub fn nearest_to(lo: [usize; 3], len: [usize; 3], cell: [usize; 3]) -> Self {
        let ascending = std::array::from_fn(|i| {
            let low = lo[i];
            let high = lo[i] + len[i].saturating_sub(1);
            cell[i].abs_diff(low) <= cell[i].abs_diff(high)
        });
        Self::new(lo, len, ascending)
    }

    fn step(&mut self, offset: &mut [usize; 3]) -> bool {
        for axis in (0..3).rev() {
            if self.ascending[axis] && offset[axis] + 1 < self.len[axis] {
                offset[axis] += 1;
                return true;
            }
            if !self.ascending[axis] && offset[axis] > 0 {
                offset[axis] -= 1;
                return true;
            }
            self.ascending[axis] = !self.ascending[axis];
        }
        false
    }
}

impl Iterator for SnakeBox {
    type Item = [usize; 3];

    fn next(&mut self) -> Option<[usize; 3]> {
        if self.done {
            return None;
        }
        let offset = match self.offset {
            None => std::array::from_fn(|i| {
                if self.ascending[i] {
                    0
                } else {
                    self.len[i] - 1
                }
            }),
            Some(mut offset) => {
                if !self.step(&mut offset) {
                    self.done = true;
                    return None;
                }
                offset
            }
        };
        self.offset = Some(offset);
        Some(std::array::from_fn(|i| self.lo[i] + offset[i]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    /// First cell of the slab.
    Start,
    /// Unit step along one spatial ordinate; the scratch window can shift.
    Shift {
        ordinate: Ordinate,
        delta: i32,
    },
    /// Anything else; the scratch window must be refilled.
    Jump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visit {
    /// `(x, y, z)`
    pub cell: [usize; 3],
    pub movement: Movement,
    /// True when this cell lies in a different swatch from the previous one.
    pub crosses_swatch: bool,
}

/// Visits every spatial cell of an `extent` box exactly once, swatch by
/// swatch.
#[derive(Debug, Clone)]
pub struct Traversal {
    extent: [usize; 3],
    swatch: [usize; 3],
    swatches: SnakeBox,
    cells: Option<SnakeBox>,
    previous: Option<([usize; 3], [usize; 3])>,
}

impl Traversal {
    /// `extent` and `swatch` are `(x, y, z)`.
    pub fn new(extent: [usize; 3], swatch: [usize; 3]) -> Self {
        assert!(
            swatch.iter().all(|&n| n > 0),
            "swatch size must be positive"
        );
        let counts = std::array::from_fn(|i| extent[i].div_ceil(swatch[i]));
        Self {
            extent,
            swatch,
            swatches: SnakeBox::new([0; 3], counts, [true; 3]),
            cells: None,
            previous: None,
        }
    }

    /// Spatial part of a store's `(t, x, y, z)` geometry.
    pub fn for_slab(extent: [usize; 4], swatch: [usize; 4]) -> Self {
        Self::new(
            [extent[1], extent[2], extent[3]],
            [swatch[1], swatch[2], swatch[3]],
        )
    }

    fn next_cell(&mut self) -> Option<[usize; 3]> {
        loop {
            if let Some(cell) = self.cells.as_mut().and_then(|cells| cells.next()) {
                return Some(cell);
            }
            let block = self.swatches.next()?;
            let lo: [usize; 3] = std::array::from_fn(|i| block[i] * self.swatch[i]);
            let len = std::array::from_fn(|i| self.swatch[i].min(self.extent[i] - lo[i]));
            self.cells = Some(match self.previous {
                Some((cell, _)) => SnakeBox::nearest_to(lo, len, cell),
                None => SnakeBox::new(lo, len, [true; 3]),
            });
        }
    }
}

impl Iterator for Traversal {
    type Item = Visit;

    fn next(&mut self) -> Option<Visit> {
        let cell = self.next_cell()?;
        let block: [usize; 3] = std::array::from_fn(|i| cell[i] / self.swatch[i]);
        let visit = match self.previous {
            None => Visit {
                cell,
                movement: Movement::Start,
                crosses_swatch: true,
            },
            Some((prev, prev_block)) => Visit {
                cell,
                movement: movement(prev, cell),
                crosses_swatch: prev_block != block,
            },
        };
        self.previous = Some((cell, block));
        Some(visit)
    }
}

fn movement(from: [usize; 3], to: [usize; 3]) -> Movement {
    let mut changed = (0..3).filter(|&i| from[i] != to[i]);
    match (changed.next(), changed.next()) {
        (Some(axis), None) if from[axis].abs_diff(to[axis]) == 1 => Movement::Shift {
            ordinate: Ordinate::SPATIAL[axis],
            delta: if to[axis] > from[axis] { 1 } else { -1 },
        },
        _ => Movement::Jump,
    }
}
