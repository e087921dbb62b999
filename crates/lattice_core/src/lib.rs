//! The `lattice_core` crate is the numerical engine behind lattice PDE solves.
//! It is generic over the coefficient type, supporting `f64`, complex numbers
//! and small non-commutative matrices.
//!
//! Key components:
//! - **Expression**: immutable symbolic trees with memoized evaluation and differentiation.
//! - **Stencil**: rewrites continuous partial derivatives into finite-difference stencils.
//! - **Newton**: a Newton–Raphson driver that iterates against caller-owned scratch state.
//! - **Grid**: an out-of-core 4-D field paged in fixed-size swatches, plus its traversal order.
//! - **March**: advances a discretized equation one time slab at a time.
pub mod error;
pub mod expression;
pub mod grid;
pub mod lattice;
pub mod march;
pub mod newton;
pub mod scratch;
pub mod stencil;
pub mod traits;
