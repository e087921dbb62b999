use crate::error::ExprError;
use nalgebra::Matrix2;
use num_complex::Complex;
use num_traits::{One, Zero};
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::ops::Neg;

/// A coefficient type that expression trees can carry.
///
/// Addition comes from `Zero`, multiplication from `One`, and the pair of them
/// doubles as the value factory (`V::zero()`, `V::one()`). Multiplication need
/// not commute; the engine never reorders factors.
pub trait Algebraic: Clone + Debug + Zero + One + Neg<Output = Self> + Send + Sync + 'static {
    /// Embeds a real number, used for stencil weights and step sizes.
    fn from_real(value: f64) -> Self;

    /// Returns `a` such that `a * self == 1`, or `NotInvertible`.
    fn left_inverse(&self) -> Result<Self, ExprError>;

    /// A non-negative size used by residual-based stopping rules.
    fn magnitude(&self) -> f64;

    /// Bitwise equality; must agree with `structural_hash`.
    fn structurally_equals(&self, other: &Self) -> bool;

    fn structural_hash<H: Hasher>(&self, state: &mut H);
}

impl Algebraic for f64 {
    fn from_real(value: f64) -> Self {
        value
    }

    fn left_inverse(&self) -> Result<Self, ExprError> {
        if *self == 0.0 {
            return Err(ExprError::NotInvertible);
        }
        Ok(1.0 / self)
    }

    fn magnitude(&self) -> f64 {
        self.abs()
    }

    fn structurally_equals(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }

    fn structural_hash<H: Hasher>(&self, state: &mut H) {
        self.to_bits().hash(state);
    }
}

impl Algebraic for Complex<f64> {
    fn from_real(value: f64) -> Self {
        Complex::new(value, 0.0)
    }

    fn left_inverse(&self) -> Result<Self, ExprError> {
        if self.norm_sqr() == 0.0 {
            return Err(ExprError::NotInvertible);
        }
        Ok(self.inv())
    }

    fn magnitude(&self) -> f64 {
        self.norm()
    }

    fn structurally_equals(&self, other: &Self) -> bool {
        self.re.to_bits() == other.re.to_bits() && self.im.to_bits() == other.im.to_bits()
    }

    fn structural_hash<H: Hasher>(&self, state: &mut H) {
        self.re.to_bits().hash(state);
        self.im.to_bits().hash(state);
    }
}

/// 2x2 real matrices: the smallest non-commutative coefficient ring, useful for
/// checking that nothing in the engine silently swaps factors.
impl Algebraic for Matrix2<f64> {
    fn from_real(value: f64) -> Self {
        Matrix2::identity() * value
    }

    fn left_inverse(&self) -> Result<Self, ExprError> {
        self.try_inverse().ok_or(ExprError::NotInvertible)
    }

    fn magnitude(&self) -> f64 {
        self.norm()
    }

    fn structurally_equals(&self, other: &Self) -> bool {
        self.iter()
            .zip(other.iter())
            .all(|(a, b)| a.to_bits() == b.to_bits())
    }

    fn structural_hash<H: Hasher>(&self, state: &mut H) {
        for entry in self.iter() {
            entry.to_bits().hash(state);
        }
    }
}

/// Convenience check used by the node constructors' simplification rules.
pub(crate) fn is_zero_value<V: Algebraic>(value: &V) -> bool {
    value.structurally_equals(&V::zero())
}

pub(crate) fn is_one_value<V: Algebraic>(value: &V) -> bool {
    value.structurally_equals(&V::one())
}
