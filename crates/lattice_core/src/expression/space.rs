use super::Node;
use crate::lattice::Ordinate;
use crate::traits::Algebraic;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Immutable substitution environment: ordinate symbol → bound expression.
///
/// Never mutated in place; `with` builds a new space. Equality and hashing
/// are by content, so two spaces built the same way share cache entries.
#[derive(Debug, Clone)]
pub struct ImplicitSpace<V: Algebraic> {
    bindings: Arc<BTreeMap<Ordinate, Node<V>>>,
    digest: u64,
}

impl<V: Algebraic> ImplicitSpace<V> {
    pub fn new() -> Self {
        Self::from_map(BTreeMap::new())
    }

    pub fn from_bindings(bindings: impl IntoIterator<Item = (Ordinate, Node<V>)>) -> Self {
        Self::from_map(bindings.into_iter().collect())
    }

    fn from_map(bindings: BTreeMap<Ordinate, Node<V>>) -> Self {
        let mut state = DefaultHasher::new();
        for (ordinate, node) in &bindings {
            ordinate.hash(&mut state);
            node.digest().hash(&mut state);
        }
        Self {
            bindings: Arc::new(bindings),
            digest: state.finish(),
        }
    }

    /// A new space with `ordinate` bound to `value`, replacing any old binding.
    pub fn with(&self, ordinate: Ordinate, value: Node<V>) -> Self {
        let mut bindings = (*self.bindings).clone();
        bindings.insert(ordinate, value);
        Self::from_map(bindings)
    }

    pub fn get(&self, ordinate: Ordinate) -> Option<&Node<V>> {
        self.bindings.get(&ordinate)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ordinate, &Node<V>)> {
        self.bindings.iter()
    }
}

impl<V: Algebraic> Default for ImplicitSpace<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Algebraic> PartialEq for ImplicitSpace<V> {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.bindings, &other.bindings) {
            return true;
        }
        self.digest == other.digest
            && self.bindings.len() == other.bindings.len()
            && self
                .bindings
                .iter()
                .zip(other.bindings.iter())
                .all(|((o1, n1), (o2, n2))| o1 == o2 && n1.structurally_equals(n2))
    }
}

impl<V: Algebraic> Eq for ImplicitSpace<V> {}

impl<V: Algebraic> Hash for ImplicitSpace<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.digest);
    }
}
