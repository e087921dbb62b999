//! Ordinates, lattice offsets and derivative counts.
//!
//! The lattice is four-dimensional, `(t, x, y, z)`. Offsets and derivative
//! orders are fixed-size arrays indexed by ordinate, so they hash and order by
//! content and never need a missing-axis check.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ordinate {
    T,
    X,
    Y,
    Z,
}

impl Ordinate {
    pub const ALL: [Ordinate; 4] = [Ordinate::T, Ordinate::X, Ordinate::Y, Ordinate::Z];
    pub const SPATIAL: [Ordinate; 3] = [Ordinate::X, Ordinate::Y, Ordinate::Z];

    pub fn index(self) -> usize {
        match self {
            Ordinate::T => 0,
            Ordinate::X => 1,
            Ordinate::Y => 2,
            Ordinate::Z => 3,
        }
    }
}

impl fmt::Display for Ordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ordinate::T => "t",
            Ordinate::X => "x",
            Ordinate::Y => "y",
            Ordinate::Z => "z",
        };
        f.write_str(name)
    }
}

/// Integer displacement from a reference cell, one entry per ordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct OffsetKey([i32; 4]);

impl OffsetKey {
    pub const ORIGIN: OffsetKey = OffsetKey([0; 4]);

    pub fn new(t: i32, x: i32, y: i32, z: i32) -> Self {
        Self([t, x, y, z])
    }

    pub fn along(ordinate: Ordinate, delta: i32) -> Self {
        Self::ORIGIN.shifted(ordinate, delta)
    }

    pub fn get(&self, ordinate: Ordinate) -> i32 {
        self.0[ordinate.index()]
    }

    pub fn shifted(mut self, ordinate: Ordinate, delta: i32) -> Self {
        self.0[ordinate.index()] += delta;
        self
    }

    pub fn components(&self) -> [i32; 4] {
        self.0
    }

    /// Largest absolute offset along `ordinate`.
    pub fn reach(&self, ordinate: Ordinate) -> u32 {
        self.get(ordinate).unsigned_abs()
    }
}

impl fmt::Display for OffsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [t, x, y, z] = self.0;
        write!(f, "[t{t:+} x{x:+} y{y:+} z{z:+}]")
    }
}

/// Number of derivatives to take along each ordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DerivativeOrders([u32; 4]);

impl DerivativeOrders {
    pub fn new(t: u32, x: u32, y: u32, z: u32) -> Self {
        Self([t, x, y, z])
    }

    pub fn single(ordinate: Ordinate, order: u32) -> Self {
        let mut orders = Self::default();
        orders.0[ordinate.index()] = order;
        orders
    }

    pub fn get(&self, ordinate: Ordinate) -> u32 {
        self.0[ordinate.index()]
    }

    pub fn incremented(mut self, ordinate: Ordinate) -> Self {
        self.0[ordinate.index()] += 1;
        self
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_order_by_ordinate() {
        let a = OffsetKey::new(0, -1, 5, 5);
        let b = OffsetKey::new(0, 1, -5, -5);
        assert!(a < b);
        assert_eq!(OffsetKey::along(Ordinate::Y, -2).get(Ordinate::Y), -2);
        assert_eq!(OffsetKey::new(1, -3, 0, 2).reach(Ordinate::X), 3);
    }

    #[test]
    fn derivative_orders_increment_per_axis() {
        let orders = DerivativeOrders::default()
            .incremented(Ordinate::X)
            .incremented(Ordinate::X)
            .incremented(Ordinate::T);
        assert_eq!(orders, DerivativeOrders::new(1, 2, 0, 0));
        assert_eq!(orders.total(), 3);
        assert!(DerivativeOrders::default().is_zero());
    }
}
