//! Finite-difference stencil expansion.
//!
//! A derivative leaf `∂ⁿu/∂oⁿ` becomes a weighted sum of `Cell` leaves. The
//! weights are kept symbolic as numerator/denominator pairs so the step sizes
//! stay visible in the expression until evaluation. Orders are applied one
//! ordinate at a time, since mixed partials commute.
//!
//! | order | rule                                              |
//! |-------|---------------------------------------------------|
//! | 0     | identity                                          |
//! | 1     | `(u₊₁ − u₋₁) / 2h`                                |
//! | 2     | `(u₊₁ − 2u₀ + u₋₁) / h²`                          |
//! | 3     | `(u₊₂ − 2u₊₁ + 2u₋₁ − u₋₂) / 2h³`                 |
//! | n > 3 | order 3 applied to the expansion of order `n − 3` |

use crate::error::ExprError;
use crate::expression::{ImplicitSpace, NoCells, Node, NodeKind};
use crate::lattice::{DerivativeOrders, OffsetKey, Ordinate};
use crate::traits::Algebraic;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Offset → accumulated coefficient.
pub type StencilMap<V> = BTreeMap<OffsetKey, CoeffNode<V>>;

/// A symbolic rational coefficient `numerator · denominator⁻¹`.
#[derive(Debug, Clone)]
pub struct CoeffNode<V: Algebraic> {
    numerator: Node<V>,
    denominator: Node<V>,
}

impl<V: Algebraic> CoeffNode<V> {
    /// Panics if `denominator` is the literal zero.
    pub fn new(numerator: Node<V>, denominator: Node<V>) -> Self {
        assert!(
            !denominator.is_zero(),
            "stencil coefficient with a zero denominator"
        );
        Self {
            numerator,
            denominator,
        }
    }

    pub fn unit() -> Self {
        Self::new(Node::one(), Node::one())
    }

    pub fn numerator(&self) -> &Node<V> {
        &self.numerator
    }

    pub fn denominator(&self) -> &Node<V> {
        &self.denominator
    }

    /// `(n · weight) / (d · scale)`
    pub fn scaled(&self, weight: Node<V>, scale: Node<V>) -> Self {
        Self::new(
            Node::product(self.numerator.clone(), weight),
            Node::product(self.denominator.clone(), scale),
        )
    }

    /// Adds two coefficients. Equal denominators add numerators directly,
    /// otherwise `a/b + c/d = (a·d + c·b) / (b·d)`. Step sizes are scalars,
    /// so the cross-multiplication assumes denominators commute.
    pub fn add(&self, other: &CoeffNode<V>) -> Self {
        if self.shares_denominator(other) {
            return Self::new(
                Node::sum(self.numerator.clone(), other.numerator.clone()),
                self.denominator.clone(),
            );
        }
        Self::new(
            Node::sum(
                Node::product(self.numerator.clone(), other.denominator.clone()),
                Node::product(other.numerator.clone(), self.denominator.clone()),
            ),
            Node::product(self.denominator.clone(), other.denominator.clone()),
        )
    }

    fn shares_denominator(&self, other: &CoeffNode<V>) -> bool {
        if self.denominator.structurally_equals(&other.denominator) {
            return true;
        }
        match (self.denominator.as_constant(), other.denominator.as_constant()) {
            (Some(a), Some(b)) => a.structurally_equals(b),
            _ => false,
        }
    }

    pub fn to_node(&self) -> Node<V> {
        Node::quotient(self.numerator.clone(), self.denominator.clone())
    }

    /// Numeric value under `space`; step sizes may be bound ordinates.
    pub fn evaluate(&self, space: &ImplicitSpace<V>) -> Result<V, ExprError> {
        self.to_node().evaluate(space, &NoCells)
    }
}

struct Rule {
    /// `(offset, weight)`; zero weights are omitted.
    taps: &'static [(i32, f64)],
    scale: f64,
    power: u32,
}

const FIRST: Rule = Rule {
    taps: &[(1, 1.0), (-1, -1.0)],
    scale: 2.0,
    power: 1,
};

const SECOND: Rule = Rule {
    taps: &[(1, 1.0), (0, -2.0), (-1, 1.0)],
    scale: 1.0,
    power: 2,
};

const THIRD: Rule = Rule {
    taps: &[(2, 1.0), (1, -2.0), (-1, 2.0), (-2, -1.0)],
    scale: 2.0,
    power: 3,
};

/// Rewrites continuous derivatives into lattice stencils with one step size
/// per ordinate.
#[derive(Debug, Clone)]
pub struct Discretizer<V: Algebraic> {
    steps: [Node<V>; 4],
}

impl<V: Algebraic> Discretizer<V> {
    /// Steps in `(t, x, y, z)` order. Each may be any expression that
    /// evaluates to a non-zero value.
    pub fn new(steps: [Node<V>; 4]) -> Self {
        for step in &steps {
            assert!(!step.is_zero(), "lattice step size must be non-zero");
        }
        Self { steps }
    }

    pub fn from_real(steps: [f64; 4]) -> Self {
        Self::new(steps.map(Node::real))
    }

    pub fn step(&self, ordinate: Ordinate) -> &Node<V> {
        &self.steps[ordinate.index()]
    }

    /// Stencil for the given derivative orders, centred on the origin.
    pub fn expand(&self, orders: &DerivativeOrders) -> StencilMap<V> {
        let mut map = StencilMap::new();
        map.insert(OffsetKey::ORIGIN, CoeffNode::unit());
        for ordinate in Ordinate::ALL {
            map = self.apply(map, ordinate, orders.get(ordinate));
        }
        map
    }

    /// Applies `order` derivatives along `ordinate` to an existing stencil.
    pub fn apply(&self, map: StencilMap<V>, ordinate: Ordinate, order: u32) -> StencilMap<V> {
        match order {
            0 => map,
            1 => self.apply_rule(&map, ordinate, &FIRST),
            2 => self.apply_rule(&map, ordinate, &SECOND),
            3 => self.apply_rule(&map, ordinate, &THIRD),
            n => {
                let reduced = self.apply(map, ordinate, n - 3);
                self.apply_rule(&reduced, ordinate, &THIRD)
            }
        }
    }

    fn apply_rule(&self, map: &StencilMap<V>, ordinate: Ordinate, rule: &Rule) -> StencilMap<V> {
        let h = self.step(ordinate);
        let mut power = h.clone();
        for _ in 1..rule.power {
            power = Node::product(power, h.clone());
        }
        let scale = Node::product(Node::real(rule.scale), power);

        let mut out = StencilMap::new();
        for (key, coeff) in map {
            for &(delta, weight) in rule.taps {
                let term = coeff.scaled(Node::real(weight), scale.clone());
                // The same offset is reached along different paths; those
                // contributions must add up, never overwrite each other.
                match out.entry(key.shifted(ordinate, delta)) {
                    Entry::Occupied(mut slot) => {
                        let merged = slot.get().add(&term);
                        slot.insert(merged);
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(term);
                    }
                }
            }
        }
        out
    }

    /// `Σ coeff · Cell(offset)` in offset order.
    pub fn stencil_expression(map: &StencilMap<V>) -> Node<V> {
        map.iter().fold(Node::zero(), |acc, (key, coeff)| {
            Node::sum(acc, Node::product(coeff.to_node(), Node::cell(*key)))
        })
    }

    /// Rewrites a continuous PDE expression into one over `Cell` leaves.
    ///
    /// Derivative markers are applied symbolically to their operand, the
    /// unknown becomes the origin cell and derivative leaves become stencils.
    /// A marker that is not the left factor of a product cannot be applied
    /// and yields `DistributionRequired`; `Node::distribute` fixes that.
    pub fn discretize(
        &self,
        node: &Node<V>,
        space: &ImplicitSpace<V>,
    ) -> Result<Node<V>, ExprError> {
        match node.kind() {
            NodeKind::Product(a, b) => {
                if let NodeKind::PartialMarker(ordinates) = a.kind() {
                    let derived = b.differentiate(&Node::ordinate_leaves(ordinates), space)?;
                    return self.discretize(&derived, space);
                }
                Ok(Node::product(
                    self.discretize(a, space)?,
                    self.discretize(b, space)?,
                ))
            }
            NodeKind::Sum(a, b) => Ok(Node::sum(
                self.discretize(a, space)?,
                self.discretize(b, space)?,
            )),
            NodeKind::Negation(a) => Ok(Node::negate(self.discretize(a, space)?)),
            NodeKind::LeftInverse(a) => Ok(Node::left_inverse(self.discretize(a, space)?)),
            NodeKind::PartialMarker(_) => Err(ExprError::DistributionRequired {
                context: "discretization of a partial derivative marker",
            }),
            NodeKind::Unknown => Ok(Node::cell(OffsetKey::ORIGIN)),
            NodeKind::Derivative(orders) => Ok(Self::stencil_expression(&self.expand(orders))),
            NodeKind::Constant(_) | NodeKind::Ordinate(_) | NodeKind::Cell(_) => Ok(node.clone()),
        }
    }
}
