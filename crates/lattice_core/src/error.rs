//! Error kinds raised by the expression engine, the grid store and the solver.

use crate::lattice::Ordinate;
use thiserror::Error;

/// Domain faults from evaluating or differentiating an expression.
///
/// Both `NotInvertible` and `DistributionRequired` are recoverable: a caller
/// that can distribute (see `Node::distribute`) may retry, anything else should
/// surface them as a failed solve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("value has no left inverse")]
    NotInvertible,

    #[error("multiplication must be distributed before {context} can proceed")]
    DistributionRequired {
        context: &'static str,
    },

    #[error("ordinate {0} has no binding in the implicit space")]
    Unbound(Ordinate),

    #[error("continuous derivative leaf must be expanded into a stencil before evaluation")]
    Undiscretized,
}

/// Failures of the out-of-core grid store. None of these are recoverable by
/// substituting a value; a solve that hits one must stop.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode swatch {swatch}: {reason}")]
    Serialization {
        swatch: String,
        reason: String,
    },

    #[error("swatch {swatch} is corrupted: {reason}")]
    Corrupted {
        swatch: String,
        reason: String,
    },

    #[error("coordinate {coord:?} is outside the grid extent {extent:?}")]
    OutOfBounds {
        coord: [usize; 4],
        extent: [usize; 4],
    },

    #[error("invalid grid store configuration: {0}")]
    InvalidConfig(String),
}

/// Failures of a Newton–Raphson solve or of a time march built on it.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid solver settings: {0}")]
    InvalidSettings(String),

    #[error("Newton–Raphson failed to converge in {iterations} iterations (|F| = {residual:e})")]
    DidNotConverge {
        iterations: usize,
        residual: f64,
    },

    #[error("solve failed at cell {cell:?}: {source}")]
    AtCell {
        cell: [usize; 4],
        #[source]
        source: Box<SolveError>,
    },
}

impl SolveError {
    /// Strips any `AtCell` wrappers.
    pub fn root(&self) -> &SolveError {
        match self {
            SolveError::AtCell { source, .. } => source.root(),
            other => other,
        }
    }
}
