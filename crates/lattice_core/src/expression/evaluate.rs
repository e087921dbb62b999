//! Numeric evaluation, plain and memoized.

use super::{ImplicitSpace, Node, NodeKind};
use crate::error::ExprError;
use crate::lattice::OffsetKey;
use crate::traits::Algebraic;
use std::collections::HashMap;

/// Supplies values for `Cell` leaves, normally a scratch window around the
/// cell being solved.
pub trait CellSource<V> {
    /// Panics if `key` lies outside the source; that is a malformed stencil,
    /// not a recoverable fault.
    fn cell(&self, key: &OffsetKey) -> V;
}

/// For purely symbolic expressions that never read the lattice.
pub struct NoCells;

impl<V: Algebraic> CellSource<V> for NoCells {
    fn cell(&self, key: &OffsetKey) -> V {
        panic!("expression reads lattice cell {key} but no cells are in scope")
    }
}

/// Memo table for one evaluation pass, keyed by `(node, implicit space)`.
///
/// Owned by the caller and dropped after the pass; it must not outlive a
/// change to the cell values it was filled against.
pub struct EvalCache<V: Algebraic> {
    values: HashMap<(Node<V>, ImplicitSpace<V>), V>,
    hits: usize,
}

impl<V: Algebraic> EvalCache<V> {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            hits: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

impl<V: Algebraic> Default for EvalCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Algebraic> Node<V> {
    /// Evaluates the expression under `space`, reading lattice cells from `cells`.
    ///
    /// `Unknown` reads the cell at the origin. A product whose left factor is
    /// a partial derivative marker is evaluated by differentiating the right
    /// factor symbolically first.
    pub fn evaluate(
        &self,
        space: &ImplicitSpace<V>,
        cells: &dyn CellSource<V>,
    ) -> Result<V, ExprError> {
        let mut recurse = |child: &Node<V>| child.evaluate(space, cells);
        self.evaluate_step(space, cells, &mut recurse)
    }

    /// Same contract as `evaluate`; shared subtrees are computed once per cache.
    pub fn evaluate_cached(
        &self,
        space: &ImplicitSpace<V>,
        cells: &dyn CellSource<V>,
        cache: &mut EvalCache<V>,
    ) -> Result<V, ExprError> {
        let key = (self.clone(), space.clone());
        if let Some(value) = cache.values.get(&key) {
            cache.hits += 1;
            return Ok(value.clone());
        }
        let value = self.evaluate_step(space, cells, &mut |child: &Node<V>| {
            child.evaluate_cached(space, cells, cache)
        })?;
        cache.values.insert(key, value.clone());
        Ok(value)
    }

    fn evaluate_step(
        &self,
        space: &ImplicitSpace<V>,
        cells: &dyn CellSource<V>,
        eval: &mut dyn FnMut(&Node<V>) -> Result<V, ExprError>,
    ) -> Result<V, ExprError> {
        match self.kind() {
            NodeKind::Constant(value) => Ok(value.clone()),
            NodeKind::Sum(a, b) => {
                let a = eval(a)?;
                let b = eval(b)?;
                Ok(a + b)
            }
            NodeKind::Product(a, b) => {
                if let NodeKind::PartialMarker(ordinates) = a.kind() {
                    let derived = b.differentiate(&Node::ordinate_leaves(ordinates), space)?;
                    return eval(&derived);
                }
                let a = eval(a)?;
                let b = eval(b)?;
                Ok(a * b)
            }
            NodeKind::Negation(a) => Ok(-eval(a)?),
            NodeKind::LeftInverse(a) => eval(a)?.left_inverse(),
            NodeKind::PartialMarker(_) => Err(ExprError::DistributionRequired {
                context: "evaluation of a partial derivative marker",
            }),
            NodeKind::Ordinate(ordinate) => match space.get(*ordinate) {
                Some(binding) => eval(binding),
                None => Err(ExprError::Unbound(*ordinate)),
            },
            NodeKind::Unknown => Ok(cells.cell(&OffsetKey::ORIGIN)),
            NodeKind::Derivative(_) => Err(ExprError::Undiscretized),
            NodeKind::Cell(key) => Ok(cells.cell(key)),
        }
    }
}
