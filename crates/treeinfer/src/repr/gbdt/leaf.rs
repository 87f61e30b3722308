//! Leaf value types for tree nodes.

use std::fmt::Debug;

/// Trait for values stored in leaf nodes.
///
/// Every leaf exposes its outputs as a slice: one value for scalar leaves,
/// `K` values for vector leaves.
pub trait LeafValue: Clone + Debug + Send + Sync + 'static {
    /// Whether a single tree writes every output group at once.
    const IS_VECTOR: bool;

    /// Output values carried by this leaf.
    fn values(&self) -> &[f32];

    /// Number of outputs carried by this leaf.
    #[inline]
    fn width(&self) -> usize {
        self.values().len()
    }
}

/// Scalar leaf value (single f32).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScalarLeaf(pub f32);

impl LeafValue for ScalarLeaf {
    const IS_VECTOR: bool = false;

    #[inline]
    fn values(&self) -> &[f32] {
        std::slice::from_ref(&self.0)
    }
}

impl From<f32> for ScalarLeaf {
    fn from(value: f32) -> Self {
        Self(value)
    }
}

impl From<ScalarLeaf> for f32 {
    fn from(leaf: ScalarLeaf) -> Self {
        leaf.0
    }
}

/// Vector leaf value for multi-output trees (K f32 values).
///
/// Used when a single tree produces K outputs simultaneously,
/// rather than the one-output-per-tree strategy where K separate
/// trees each produce scalar outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorLeaf {
    /// K output values
    pub values: Vec<f32>,
}

impl VectorLeaf {
    /// Create a new vector leaf with the given values.
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of outputs (K).
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl LeafValue for VectorLeaf {
    const IS_VECTOR: bool = true;

    #[inline]
    fn values(&self) -> &[f32] {
        &self.values
    }
}

impl From<Vec<f32>> for VectorLeaf {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}
