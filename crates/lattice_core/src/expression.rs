//! Immutable symbolic expression trees over an `Algebraic` coefficient type.
//!
//! Nodes are reference counted and carry a structural digest computed once at
//! construction, so two independently built nodes denoting the same quantity
//! compare and hash equal. That is what lets the evaluation and
//! differentiation caches key on nodes directly.

pub mod differentiate;
pub mod evaluate;
pub mod space;

pub use differentiate::DiffCache;
pub use evaluate::{CellSource, EvalCache, NoCells};
pub use space::ImplicitSpace;

use crate::lattice::{DerivativeOrders, OffsetKey, Ordinate};
use crate::traits::{is_one_value, is_zero_value, Algebraic};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Mul, Neg, Sub};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum NodeKind<V: Algebraic> {
    Constant(V),
    Sum(Node<V>, Node<V>),
    Product(Node<V>, Node<V>),
    Negation(Node<V>),
    LeftInverse(Node<V>),
    /// Operator `∂/∂o₁ ∂/∂o₂ …`, meaningful only as the left factor of a product.
    PartialMarker(Vec<Ordinate>),
    /// A coordinate symbol, evaluated through the implicit space.
    Ordinate(Ordinate),
    /// The continuous unknown function `u`.
    Unknown,
    /// `u` differentiated the given number of times along each ordinate.
    Derivative(DerivativeOrders),
    /// Value of the unknown at a lattice offset from the current cell.
    Cell(OffsetKey),
}

pub struct Node<V: Algebraic>(Arc<NodeData<V>>);

struct NodeData<V: Algebraic> {
    kind: NodeKind<V>,
    digest: u64,
}

impl<V: Algebraic> Node<V> {
    pub fn new(kind: NodeKind<V>) -> Self {
        let digest = digest(&kind);
        Node(Arc::new(NodeData { kind, digest }))
    }

    pub fn kind(&self) -> &NodeKind<V> {
        &self.0.kind
    }

    pub fn digest(&self) -> u64 {
        self.0.digest
    }

    // --- leaves ---

    pub fn constant(value: V) -> Self {
        Self::new(NodeKind::Constant(value))
    }

    pub fn real(value: f64) -> Self {
        Self::constant(V::from_real(value))
    }

    pub fn zero() -> Self {
        Self::constant(V::zero())
    }

    pub fn one() -> Self {
        Self::constant(V::one())
    }

    pub fn ordinate(ordinate: Ordinate) -> Self {
        Self::new(NodeKind::Ordinate(ordinate))
    }

    pub fn unknown() -> Self {
        Self::new(NodeKind::Unknown)
    }

    pub fn derivative(orders: DerivativeOrders) -> Self {
        if orders.is_zero() {
            return Self::unknown();
        }
        Self::new(NodeKind::Derivative(orders))
    }

    pub fn cell(key: OffsetKey) -> Self {
        Self::new(NodeKind::Cell(key))
    }

    /// Mixed partials commute, so the ordinate list is kept sorted.
    pub fn partial(ordinates: impl IntoIterator<Item = Ordinate>) -> Self {
        let mut ordinates: Vec<Ordinate> = ordinates.into_iter().collect();
        ordinates.sort();
        Self::new(NodeKind::PartialMarker(ordinates))
    }

    /// The ordinate leaves matching a marker's ordinate list, in order.
    pub fn ordinate_leaves(ordinates: &[Ordinate]) -> Vec<Node<V>> {
        ordinates.iter().map(|&o| Node::ordinate(o)).collect()
    }

    // --- operations (minimal simplification only) ---

    pub fn sum(a: Node<V>, b: Node<V>) -> Self {
        if a.is_zero() {
            return b;
        }
        if b.is_zero() {
            return a;
        }
        if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
            return Self::constant(x.clone() + y.clone());
        }
        Self::new(NodeKind::Sum(a, b))
    }

    pub fn difference(a: Node<V>, b: Node<V>) -> Self {
        Self::sum(a, Self::negate(b))
    }

    pub fn product(a: Node<V>, b: Node<V>) -> Self {
        if a.is_zero() || b.is_zero() {
            return Self::zero();
        }
        if a.is_one() {
            return b;
        }
        // `∂ · 1` is the derivative of a constant, not the bare operator.
        if b.is_one() && !a.needs_operand() {
            return a;
        }
        if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
            return Self::constant(x.clone() * y.clone());
        }
        Self::new(NodeKind::Product(a, b))
    }

    pub fn negate(a: Node<V>) -> Self {
        match a.kind() {
            NodeKind::Negation(inner) => inner.clone(),
            NodeKind::Constant(value) => Self::constant(-value.clone()),
            _ => Self::new(NodeKind::Negation(a)),
        }
    }

    /// Never folded, even for constants: inversion can fail and the failure
    /// belongs to evaluation.
    pub fn left_inverse(a: Node<V>) -> Self {
        Self::new(NodeKind::LeftInverse(a))
    }

    /// `a · b⁻¹`
    pub fn quotient(a: Node<V>, b: Node<V>) -> Self {
        Self::product(a, Self::left_inverse(b))
    }

    /// `∂/∂o₁… (operand)`
    pub fn apply_partial(ordinates: impl IntoIterator<Item = Ordinate>, operand: Node<V>) -> Self {
        Self::product(Self::partial(ordinates), operand)
    }

    // --- queries ---

    pub fn as_constant(&self) -> Option<&V> {
        match self.kind() {
            NodeKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_constant().is_some_and(is_zero_value)
    }

    pub fn is_one(&self) -> bool {
        self.as_constant().is_some_and(is_one_value)
    }

    pub fn is_partial_marker(&self) -> bool {
        matches!(self.kind(), NodeKind::PartialMarker(_))
    }

    pub fn is_ordinate(&self, ordinate: Ordinate) -> bool {
        matches!(self.kind(), NodeKind::Ordinate(o) if *o == ordinate)
    }

    /// True when this node is an operator still waiting for the operand it
    /// should be applied to, e.g. `∂x`, `∂x + 2` or `c · ∂x`.
    pub fn needs_operand(&self) -> bool {
        match self.kind() {
            NodeKind::PartialMarker(_) => true,
            NodeKind::Sum(a, b) => a.needs_operand() || b.needs_operand(),
            NodeKind::Negation(a) => a.needs_operand(),
            NodeKind::Product(_, b) => b.needs_operand(),
            _ => false,
        }
    }

    pub fn structurally_equals(&self, other: &Node<V>) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        if self.digest() != other.digest() {
            return false;
        }
        match (self.kind(), other.kind()) {
            (NodeKind::Constant(a), NodeKind::Constant(b)) => a.structurally_equals(b),
            (NodeKind::Sum(a1, b1), NodeKind::Sum(a2, b2))
            | (NodeKind::Product(a1, b1), NodeKind::Product(a2, b2)) => {
                a1.structurally_equals(a2) && b1.structurally_equals(b2)
            }
            (NodeKind::Negation(a), NodeKind::Negation(b))
            | (NodeKind::LeftInverse(a), NodeKind::LeftInverse(b)) => a.structurally_equals(b),
            (NodeKind::PartialMarker(a), NodeKind::PartialMarker(b)) => a == b,
            (NodeKind::Ordinate(a), NodeKind::Ordinate(b)) => a == b,
            (NodeKind::Unknown, NodeKind::Unknown) => true,
            (NodeKind::Derivative(a), NodeKind::Derivative(b)) => a == b,
            (NodeKind::Cell(a), NodeKind::Cell(b)) => a == b,
            _ => false,
        }
    }

    /// Pre-order walk. Shared subtrees are visited once per reference.
    pub fn visit(&self, f: &mut impl FnMut(&Node<V>)) {
        f(self);
        match self.kind() {
            NodeKind::Sum(a, b) | NodeKind::Product(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            NodeKind::Negation(a) | NodeKind::LeftInverse(a) => a.visit(f),
            _ => {}
        }
    }

    /// Every lattice offset the expression reads.
    pub fn cells(&self) -> BTreeSet<OffsetKey> {
        let mut cells = BTreeSet::new();
        self.visit(&mut |node| {
            if let NodeKind::Cell(key) = node.kind() {
                cells.insert(*key);
            }
        });
        cells
    }

    /// Largest absolute offset along each ordinate, i.e. the stencil half-width.
    pub fn reach(&self) -> [u32; 4] {
        let mut reach = [0u32; 4];
        for key in self.cells() {
            for ordinate in Ordinate::ALL {
                let i = ordinate.index();
                reach[i] = reach[i].max(key.reach(ordinate));
            }
        }
        reach
    }

    pub fn references_ordinates(&self) -> bool {
        let mut found = false;
        self.visit(&mut |node| found |= matches!(node.kind(), NodeKind::Ordinate(_)));
        found
    }

    /// Rewrites products so every derivative marker heads the product whose
    /// right operand it acts on: `(∂ + c)·u → ∂·u + c·u`, `(a·∂)·u → a·(∂·u)`,
    /// `(−∂)·u → −(∂·u)`. This is the retry path after `DistributionRequired`.
    pub fn distribute(&self) -> Node<V> {
        match self.kind() {
            NodeKind::Sum(a, b) => Node::sum(a.distribute(), b.distribute()),
            NodeKind::Negation(a) => Node::negate(a.distribute()),
            NodeKind::LeftInverse(a) => Node::left_inverse(a.distribute()),
            NodeKind::Product(a, b) => {
                let a = a.distribute();
                let b = b.distribute();
                distribute_product(a, b)
            }
            _ => self.clone(),
        }
    }
}

fn distribute_product<V: Algebraic>(a: Node<V>, b: Node<V>) -> Node<V> {
    if !a.needs_operand() {
        return Node::product(a, b);
    }
    match a.kind() {
        NodeKind::Sum(l, r) => Node::sum(
            distribute_product(l.clone(), b.clone()),
            distribute_product(r.clone(), b),
        ),
        NodeKind::Negation(inner) => Node::negate(distribute_product(inner.clone(), b)),
        // Covers both `(c·∂)·u` and composed operators `(∂·∂)·u`.
        NodeKind::Product(l, r) => Node::product(l.clone(), distribute_product(r.clone(), b)),
        _ => Node::product(a, b),
    }
}

fn digest<V: Algebraic>(kind: &NodeKind<V>) -> u64 {
    let mut state = DefaultHasher::new();
    std::mem::discriminant(kind).hash(&mut state);
    match kind {
        NodeKind::Constant(value) => value.structural_hash(&mut state),
        NodeKind::Sum(a, b) | NodeKind::Product(a, b) => {
            a.digest().hash(&mut state);
            b.digest().hash(&mut state);
        }
        NodeKind::Negation(a) | NodeKind::LeftInverse(a) => a.digest().hash(&mut state),
        NodeKind::PartialMarker(ordinates) => ordinates.hash(&mut state),
        NodeKind::Ordinate(ordinate) => ordinate.hash(&mut state),
        NodeKind::Unknown => {}
        NodeKind::Derivative(orders) => orders.hash(&mut state),
        NodeKind::Cell(key) => key.hash(&mut state),
    }
    state.finish()
}

impl<V: Algebraic> Clone for Node<V> {
    fn clone(&self) -> Self {
        Node(Arc::clone(&self.0))
    }
}

impl<V: Algebraic> fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind().fmt(f)
    }
}

impl<V: Algebraic> PartialEq for Node<V> {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_equals(other)
    }
}

impl<V: Algebraic> Eq for Node<V> {}

impl<V: Algebraic> Hash for Node<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.digest());
    }
}

impl<V: Algebraic> Add for Node<V> {
    type Output = Node<V>;
    fn add(self, rhs: Self) -> Node<V> {
        Node::sum(self, rhs)
    }
}

impl<V: Algebraic> Sub for Node<V> {
    type Output = Node<V>;
    fn sub(self, rhs: Self) -> Node<V> {
        Node::difference(self, rhs)
    }
}

impl<V: Algebraic> Mul for Node<V> {
    type Output = Node<V>;
    fn mul(self, rhs: Self) -> Node<V> {
        Node::product(self, rhs)
    }
}

impl<V: Algebraic> Neg for Node<V> {
    type Output = Node<V>;
    fn neg(self) -> Node<V> {
        Node::negate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExprError;

    fn x() -> Node<f64> {
        Node::ordinate(Ordinate::X)
    }

    #[test]
    fn independently_built_nodes_are_structurally_equal() {
        let a = Node::<f64>::sum(x(), Node::cell(OffsetKey::along(Ordinate::X, 1)));
        let b = Node::<f64>::sum(x(), Node::cell(OffsetKey::along(Ordinate::X, 1)));
        assert!(a.structurally_equals(&b));
        assert_eq!(a.digest(), b.digest());

        let c = Node::<f64>::sum(x(), Node::cell(OffsetKey::along(Ordinate::X, -1)));
        assert!(!a.structurally_equals(&c));
    }

    #[test]
    fn constructors_apply_identity_rules() {
        let u = Node::<f64>::cell(OffsetKey::ORIGIN);
        assert!(Node::sum(Node::zero(), u.clone()).structurally_equals(&u));
        assert!(Node::product(Node::one(), u.clone()) == u);
        assert!(Node::product(u.clone(), Node::zero()).is_zero());
        assert!(Node::negate(Node::negate(u.clone())) == u);
        let folded = Node::<f64>::sum(Node::real(2.0), Node::real(3.0));
        assert_eq!(folded.as_constant(), Some(&5.0));
    }

    #[test]
    fn marker_times_one_is_not_folded_to_the_bare_operator() {
        let marker = Node::<f64>::partial([Ordinate::X]);
        let applied = Node::product(marker.clone(), Node::one());
        assert!(matches!(applied.kind(), NodeKind::Product(_, _)));
        assert!(!applied.needs_operand());
        assert!(marker.needs_operand());
    }

    #[test]
    fn partial_marker_ordinates_are_canonicalized() {
        let a = Node::<f64>::partial([Ordinate::Y, Ordinate::X]);
        let b = Node::<f64>::partial([Ordinate::X, Ordinate::Y]);
        assert_eq!(a, b);
    }

    #[test]
    fn reach_reports_stencil_half_width() {
        let expr = Node::<f64>::cell(OffsetKey::new(1, -2, 0, 0))
            + Node::cell(OffsetKey::new(-1, 1, 0, 3));
        assert_eq!(expr.reach(), [1, 2, 0, 3]);
        assert_eq!(expr.cells().len(), 2);
    }

    #[test]
    fn distribute_pushes_markers_onto_their_operand() {
        let space = ImplicitSpace::new().with(Ordinate::X, Node::real(3.0));
        let operator = Node::sum(Node::partial([Ordinate::X]), Node::real(2.0));
        let operand = Node::product(x(), x());
        let expr = Node::product(operator, operand);

        let err = expr
            .evaluate(&space, &NoCells)
            .expect_err("marker inside a sum");
        assert!(matches!(err, ExprError::DistributionRequired { .. }));

        // d/dx (x²) + 2x² at x = 3
        let value = expr
            .distribute()
            .evaluate(&space, &NoCells)
            .expect("distributed expression evaluates");
        assert_eq!(value, 6.0 + 18.0);
    }

    #[test]
    fn distribute_reassociates_scaled_markers() {
        let space = ImplicitSpace::new().with(Ordinate::X, Node::real(2.0));
        let scaled = Node::product(Node::real(5.0), Node::partial([Ordinate::X]));
        let expr = Node::product(Node::negate(scaled), Node::product(x(), x()));

        assert!(expr.evaluate(&space, &NoCells).is_err());
        let value = expr
            .distribute()
            .evaluate(&space, &NoCells)
            .expect("distributed expression evaluates");
        assert_eq!(value, -5.0 * 4.0);
    }

    #[test]
    fn distribute_unfolds_composed_operators() {
        let space = ImplicitSpace::new().with(Ordinate::X, Node::real(3.0));
        let dx = || Node::<f64>::partial([Ordinate::X]);
        let cube = || Node::product(Node::product(x(), x()), x());

        // (∂x·∂x)·x³ = 6x
        let twice = Node::product(Node::product(dx(), dx()), cube());
        assert!(twice.evaluate(&space, &NoCells).is_err());
        let value = twice
            .distribute()
            .evaluate(&space, &NoCells)
            .expect("composed operator evaluates");
        assert_eq!(value, 18.0);

        // (∂x·(∂x + 1))·x³ = 6x + 3x²
        let shifted = Node::sum(dx(), Node::one());
        let nested = Node::product(Node::product(dx(), shifted), cube());
        let value = nested
            .distribute()
            .evaluate(&space, &NoCells)
            .expect("nested operator evaluates");
        assert_eq!(value, 18.0 + 27.0);
    }

    #[test]
    fn operator_overloads_build_the_same_tree() {
        let u = Node::<f64>::cell(OffsetKey::ORIGIN);
        let built = (u.clone() - Node::real(1.0)) * u.clone();
        let explicit = Node::product(Node::difference(u.clone(), Node::real(1.0)), u);
        assert_eq!(built, explicit);
    }
}
