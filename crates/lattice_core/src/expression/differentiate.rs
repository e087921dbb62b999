//! Symbolic differentiation, plain and memoized.
//!
//! Differentiation returns a new expression, not a number. Rules are
//! structural: sums term-wise, products by the product rule with factor order
//! preserved, `d(a⁻¹) = −a⁻¹·da·a⁻¹`. Leaves answer for themselves: a node
//! equal to the variable differentiates to one, the continuous unknown and its
//! derivative leaves pick up one more derivative along an ordinate variable,
//! and everything else is zero.

use super::{ImplicitSpace, Node, NodeKind};
use crate::error::ExprError;
use crate::lattice::{DerivativeOrders, OffsetKey};
use crate::traits::Algebraic;
use std::collections::HashMap;

type DiffKey<V> = (Node<V>, ImplicitSpace<V>, Vec<Node<V>>);

/// Memo table for one differentiation pass, keyed by
/// `(node, implicit space, variables)`.
pub struct DiffCache<V: Algebraic> {
    nodes: HashMap<DiffKey<V>, Node<V>>,
    hits: usize,
}

impl<V: Algebraic> DiffCache<V> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            hits: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

impl<V: Algebraic> Default for DiffCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Algebraic> Node<V> {
    /// Partial derivative with respect to each variable in turn.
    pub fn differentiate(
        &self,
        with_respect_to: &[Node<V>],
        space: &ImplicitSpace<V>,
    ) -> Result<Node<V>, ExprError> {
        let mut current = self.clone();
        for variable in with_respect_to {
            current = current.derive(variable, space)?;
        }
        Ok(current)
    }

    /// Same contract as `differentiate`, memoized in `cache`.
    pub fn differentiate_cached(
        &self,
        with_respect_to: &[Node<V>],
        space: &ImplicitSpace<V>,
        cache: &mut DiffCache<V>,
    ) -> Result<Node<V>, ExprError> {
        let key = (self.clone(), space.clone(), with_respect_to.to_vec());
        if let Some(node) = cache.nodes.get(&key) {
            cache.hits += 1;
            return Ok(node.clone());
        }
        let result = match with_respect_to {
            [] => self.clone(),
            [variable] => self.derive_step(variable, space, &mut |child: &Node<V>| {
                child.differentiate_cached(std::slice::from_ref(variable), space, cache)
            })?,
            [first, rest @ ..] => self
                .differentiate_cached(std::slice::from_ref(first), space, cache)?
                .differentiate_cached(rest, space, cache)?,
        };
        cache.nodes.insert(key, result.clone());
        Ok(result)
    }

    fn derive(&self, variable: &Node<V>, space: &ImplicitSpace<V>) -> Result<Node<V>, ExprError> {
        self.derive_step(variable, space, &mut |child: &Node<V>| {
            child.derive(variable, space)
        })
    }

    fn derive_step(
        &self,
        variable: &Node<V>,
        space: &ImplicitSpace<V>,
        derive: &mut dyn FnMut(&Node<V>) -> Result<Node<V>, ExprError>,
    ) -> Result<Node<V>, ExprError> {
        if self.structurally_equals(variable) {
            return Ok(Node::one());
        }
        match self.kind() {
            NodeKind::Constant(_) => Ok(Node::zero()),
            NodeKind::Sum(a, b) => Ok(Node::sum(derive(a)?, derive(b)?)),
            NodeKind::Product(a, b) => {
                // Partials commute, so ∂(∂ₒ u) = ∂ₒ(∂u).
                if a.is_partial_marker() {
                    return Ok(Node::product(a.clone(), derive(b)?));
                }
                let da = derive(a)?;
                let db = derive(b)?;
                Ok(Node::sum(
                    Node::product(da, b.clone()),
                    Node::product(a.clone(), db),
                ))
            }
            NodeKind::Negation(a) => Ok(Node::negate(derive(a)?)),
            NodeKind::LeftInverse(a) => {
                let da = derive(a)?;
                if da.is_zero() {
                    return Ok(Node::zero());
                }
                let inverse = self.clone();
                Ok(Node::negate(Node::product(
                    Node::product(inverse.clone(), da),
                    inverse,
                )))
            }
            NodeKind::PartialMarker(_) => Err(ExprError::DistributionRequired {
                context: "differentiation of a partial derivative marker",
            }),
            NodeKind::Ordinate(ordinate) => match space.get(*ordinate) {
                Some(binding) => derive(binding),
                None => Ok(Node::zero()),
            },
            NodeKind::Unknown => Ok(match variable.kind() {
                NodeKind::Ordinate(o) => Node::derivative(DerivativeOrders::single(*o, 1)),
                // `Unknown` evaluates as the origin cell.
                NodeKind::Cell(key) if *key == OffsetKey::ORIGIN => Node::one(),
                _ => Node::zero(),
            }),
            NodeKind::Derivative(orders) => Ok(match variable.kind() {
                NodeKind::Ordinate(o) => Node::derivative(orders.incremented(*o)),
                _ => Node::zero(),
            }),
            NodeKind::Cell(_) => Ok(Node::zero()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{EvalCache, NoCells};
    use crate::lattice::Ordinate;
    use nalgebra::Matrix2;

    fn x() -> Node<f64> {
        Node::ordinate(Ordinate::X)
    }

    fn at(x_value: f64) -> ImplicitSpace<f64> {
        ImplicitSpace::new().with(Ordinate::X, Node::real(x_value))
    }

    #[test]
    fn product_rule_on_polynomial() {
        // d/dx (x³ + 2x) = 3x² + 2
        let cube = Node::product(Node::product(x(), x()), x());
        let expr = Node::sum(cube, Node::product(Node::real(2.0), x()));
        let derivative = expr
            .differentiate(&[x()], &ImplicitSpace::new())
            .expect("differentiates");
        let value = derivative.evaluate(&at(2.0), &NoCells).expect("evaluates");
        assert_eq!(value, 14.0);
    }

    #[test]
    fn left_inverse_derivative() {
        // d/dx (1/x) = -1/x²
        let expr = Node::left_inverse(x());
        let derivative = expr
            .differentiate(&[x()], &ImplicitSpace::new())
            .expect("differentiates");
        let value = derivative.evaluate(&at(4.0), &NoCells).expect("evaluates");
        assert!((value + 1.0 / 16.0).abs() < 1e-15);
    }

    #[test]
    fn cell_leaf_differentiates_only_against_itself() {
        let here = Node::<f64>::cell(OffsetKey::ORIGIN);
        let east = Node::<f64>::cell(OffsetKey::along(Ordinate::X, 1));
        let expr = Node::product(Node::real(3.0), Node::product(here.clone(), east.clone()));
        let space = ImplicitSpace::new();

        let d_here = expr
            .differentiate(&[here.clone()], &space)
            .expect("differentiates");
        assert!(d_here.cells().contains(&OffsetKey::along(Ordinate::X, 1)));
        assert!(!d_here.cells().contains(&OffsetKey::ORIGIN));

        let unrelated = Node::<f64>::cell(OffsetKey::along(Ordinate::Y, 1));
        assert!(expr
            .differentiate(&[unrelated], &space)
            .expect("differentiates")
            .is_zero());
    }

    #[test]
    fn unknown_picks_up_derivative_orders() {
        let u = Node::<f64>::unknown();
        let space = ImplicitSpace::new();
        let uxx = u
            .differentiate(&[x(), x()], &space)
            .expect("differentiates");
        assert!(matches!(
            uxx.kind(),
            NodeKind::Derivative(orders) if *orders == DerivativeOrders::new(0, 2, 0, 0)
        ));
        let uxt = u
            .differentiate(&[Node::ordinate(Ordinate::T), x()], &space)
            .expect("differentiates");
        let utx = u
            .differentiate(&[x(), Node::ordinate(Ordinate::T)], &space)
            .expect("differentiates");
        assert_eq!(uxt, utx);
    }

    #[test]
    fn bound_ordinate_differentiates_through_its_binding() {
        // y is bound to x², so d/dx y = 2x.
        let space = ImplicitSpace::new().with(Ordinate::Y, Node::product(x(), x()));
        let expr = Node::<f64>::ordinate(Ordinate::Y);
        let derivative = expr.differentiate(&[x()], &space).expect("differentiates");
        let value = derivative
            .evaluate(&space.with(Ordinate::X, Node::real(5.0)), &NoCells)
            .expect("evaluates");
        assert_eq!(value, 10.0);
    }

    #[test]
    fn bare_marker_requires_distribution() {
        let expr = Node::<f64>::sum(Node::partial([Ordinate::X]), x());
        let err = expr
            .differentiate(&[x()], &ImplicitSpace::new())
            .expect_err("bare marker");
        assert!(matches!(err, ExprError::DistributionRequired { .. }));
    }

    #[test]
    fn cached_differentiation_matches_uncached() {
        let shared = Node::product(x(), Node::cell(OffsetKey::ORIGIN));
        let expr = Node::sum(
            Node::product(shared.clone(), shared.clone()),
            Node::left_inverse(shared),
        );
        let space = ImplicitSpace::new();
        let variables = [x(), x()];

        let plain = expr
            .differentiate(&variables, &space)
            .expect("differentiates");
        let mut cache = DiffCache::new();
        let cached = expr
            .differentiate_cached(&variables, &space, &mut cache)
            .expect("differentiates");
        assert_eq!(plain, cached);
        assert!(cache.hits() > 0);

        struct Two;
        impl crate::expression::CellSource<f64> for Two {
            fn cell(&self, _key: &OffsetKey) -> f64 {
                2.0
            }
        }
        let point = at(1.5);
        let a = plain.evaluate(&point, &Two).expect("evaluates");
        let b = cached
            .evaluate_cached(&point, &Two, &mut EvalCache::new())
            .expect("evaluates");
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn matrix_product_rule_preserves_order() {
        // d/dx (A·x·B) with x a scalar ordinate leaf = A·B
        let a = Matrix2::new(1.0, 2.0, 0.0, 1.0);
        let b = Matrix2::new(0.0, 1.0, 1.0, 0.0);
        let xm = Node::<Matrix2<f64>>::ordinate(Ordinate::X);
        let left = Node::product(Node::constant(a), xm.clone());
        let expr = Node::product(left, Node::constant(b));
        let derivative = expr
            .differentiate(&[xm], &ImplicitSpace::new())
            .expect("differentiates");
        let value = derivative
            .evaluate(&ImplicitSpace::new(), &NoCells)
            .expect("evaluates");
        assert_eq!(value, a * b);
    }
}
