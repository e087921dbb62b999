//! 4-D lattice fields: the `Field` abstraction, an in-memory grid, and the
//! out-of-core swatch store with its traversal order.

pub mod backend;
pub mod store;
pub mod traversal;

pub use backend::{DirectoryBackend, MemoryBackend, SwatchBackend};
pub use store::{GridStore, GridStoreConfig, StoreStats};
pub use traversal::{Movement, SnakeBox, Traversal, Visit};

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 4-D array of doubles addressed by `(t, x, y, z)`.
///
/// Reads take `&mut self` because a backing store may page data in.
pub trait Field {
    fn extent(&self) -> [usize; 4];

    fn get(&mut self, t: usize, x: usize, y: usize, z: usize) -> Result<f64, StoreError>;

    fn set(&mut self, t: usize, x: usize, y: usize, z: usize, value: f64) -> Result<(), StoreError>;

    fn get_at(&mut self, coord: [usize; 4]) -> Result<f64, StoreError> {
        let [t, x, y, z] = coord;
        self.get(t, x, y, z)
    }

    fn set_at(&mut self, coord: [usize; 4], value: f64) -> Result<(), StoreError> {
        let [t, x, y, z] = coord;
        self.set(t, x, y, z, value)
    }
}

pub(crate) fn check_bounds(coord: [usize; 4], extent: [usize; 4]) -> Result<(), StoreError> {
    if coord.iter().zip(extent.iter()).any(|(c, e)| c >= e) {
        return Err(StoreError::OutOfBounds { coord, extent });
    }
    Ok(())
}

/// Row-major offset of `coord` in a box of the given extent, `z` fastest.
pub(crate) fn linear_index(coord: [usize; 4], extent: [usize; 4]) -> usize {
    ((coord[0] * extent[1] + coord[1]) * extent[2] + coord[2]) * extent[3] + coord[3]
}

/// Whole field held in memory; the reference the disk-backed store is
/// checked against.
#[derive(Debug, Clone)]
pub struct DenseGrid {
    extent: [usize; 4],
    values: Vec<f64>,
}

impl DenseGrid {
    pub fn new(extent: [usize; 4]) -> Self {
        let len = extent.iter().product();
        Self {
            extent,
            values: vec![0.0; len],
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl Field for DenseGrid {
    fn extent(&self) -> [usize; 4] {
        self.extent
    }

    fn get(&mut self, t: usize, x: usize, y: usize, z: usize) -> Result<f64, StoreError> {
        let coord = [t, x, y, z];
        check_bounds(coord, self.extent)?;
        Ok(self.values[linear_index(coord, self.extent)])
    }

    fn set(
        &mut self,
        t: usize,
        x: usize,
        y: usize,
        z: usize,
        value: f64,
    ) -> Result<(), StoreError> {
        let coord = [t, x, y, z];
        check_bounds(coord, self.extent)?;
        self.values[linear_index(coord, self.extent)] = value;
        Ok(())
    }
}

/// Swatch coordinate: the cell coordinate divided by the swatch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwatchKey(pub [usize; 4]);

impl SwatchKey {
    pub fn containing(coord: [usize; 4], swatch: [usize; 4]) -> Self {
        Self(std::array::from_fn(|i| coord[i] / swatch[i]))
    }

    /// First cell of the swatch.
    pub fn origin(&self, swatch: [usize; 4]) -> [usize; 4] {
        std::array::from_fn(|i| self.0[i] * swatch[i])
    }
}

impl fmt::Display for SwatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [t, x, y, z] = self.0;
        write!(f, "{t}-{x}-{y}-{z}")
    }
}
