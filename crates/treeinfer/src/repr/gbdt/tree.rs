//! Canonical tree representation (SoA) and read-only tree interface.
//!
//! This module provides:
//! - [`Tree`]: Immutable SoA tree storage for efficient traversal
//! - [`TreeView`]: Read-only trait for unified tree access
//! - [`TreeValidationError`]: Structural validation errors

// Allow many constructor arguments for creating trees with all their fields.
#![allow(clippy::too_many_arguments)]

use crate::data::SampleAccessor;
use crate::error::PredictError;

use super::categories::{float_to_category, CategoriesStorage};
use super::leaf::LeafValue;
use super::node::{Direction, SplitType};
use super::NodeId;

// ============================================================================
// TreeView Trait
// ============================================================================

/// A categorical split met a value it cannot route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnroutableCategory {
    pub node: NodeId,
    pub feature: u32,
    pub value: f32,
}

impl UnroutableCategory {
    /// Attach the tree index to produce the public error.
    pub fn in_tree(self, tree_idx: usize) -> PredictError {
        PredictError::UnknownCategory {
            tree_idx,
            node: self.node,
            feature: self.feature,
            value: self.value,
        }
    }
}

/// Read-only view of a tree for traversal.
///
/// Provides the minimal interface needed to walk a tree from root to leaf,
/// plus the single-node routing step shared by every traversal strategy in
/// the crate (row prediction, column-split rounds, and SHAP).
pub trait TreeView {
    /// The leaf value type (e.g., `ScalarLeaf`).
    type LeafValue: LeafValue;

    /// Number of nodes in the tree.
    fn n_nodes(&self) -> usize;

    /// Check if a node is a leaf.
    fn is_leaf(&self, node: NodeId) -> bool;

    /// Get the feature index for a split node.
    fn split_index(&self, node: NodeId) -> u32;

    /// Get the split threshold for a numeric split.
    fn split_threshold(&self, node: NodeId) -> f32;

    fn left_child(&self, node: NodeId) -> NodeId;

    fn right_child(&self, node: NodeId) -> NodeId;

    /// Get the default direction for missing values.
    fn default_left(&self, node: NodeId) -> bool;

    fn split_type(&self, node: NodeId) -> SplitType;

    /// Get reference to categories storage for categorical splits.
    fn categories(&self) -> &CategoriesStorage;

    /// Get the leaf value at a leaf node.
    fn leaf_value(&self, node: NodeId) -> &Self::LeafValue;

    /// Check if the tree has any categorical splits.
    fn has_categorical(&self) -> bool {
        !self.categories().is_empty()
    }

    #[inline]
    fn child(&self, node: NodeId, direction: Direction) -> NodeId {
        match direction {
            Direction::Left => self.left_child(node),
            Direction::Right => self.right_child(node),
        }
    }

    #[inline]
    fn default_child(&self, node: NodeId) -> NodeId {
        self.child(node, Direction::from_default_left(self.default_left(node)))
    }

    /// Decide the branch taken at a split node for a feature value.
    ///
    /// NaN is missing and follows the default direction. Numeric splits go
    /// left when `fvalue < threshold`. Categorical splits look the category
    /// up in the node's left and right sets.
    #[inline]
    fn decide(&self, node: NodeId, fvalue: f32) -> Result<Direction, UnroutableCategory> {
        if fvalue.is_nan() {
            return Ok(Direction::from_default_left(self.default_left(node)));
        }

        match self.split_type(node) {
            SplitType::Numeric => Ok(if fvalue < self.split_threshold(node) {
                Direction::Left
            } else {
                Direction::Right
            }),
            SplitType::Categorical => float_to_category(fvalue)
                .and_then(|category| self.categories().route(node, category))
                .ok_or(UnroutableCategory {
                    node,
                    feature: self.split_index(node),
                    value: fvalue,
                }),
        }
    }

    /// Traverse the tree to find the leaf node for a sample.
    #[inline]
    fn traverse_to_leaf<S: SampleAccessor + ?Sized>(
        &self,
        sample: &S,
    ) -> Result<NodeId, UnroutableCategory> {
        self.traverse_to_leaf_from(0, sample)
    }

    /// Traverse the tree starting from a specific node.
    ///
    /// Features the sample does not have are treated as missing.
    #[inline]
    fn traverse_to_leaf_from<S: SampleAccessor + ?Sized>(
        &self,
        start_node: NodeId,
        sample: &S,
    ) -> Result<NodeId, UnroutableCategory> {
        let mut node = start_node;

        while !self.is_leaf(node) {
            let fvalue = sample.feature(self.split_index(node) as usize);
            node = self.child(node, self.decide(node, fvalue)?);
        }

        Ok(node)
    }
}

// ============================================================================
// TreeValidationError
// ============================================================================

/// Structural validation errors for [`Tree`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeValidationError {
    #[error("tree has no nodes")]
    EmptyTree,
    #[error("node {node}: {side} child {child} is out of bounds for {n_nodes} nodes")]
    ChildOutOfBounds {
        node: NodeId,
        side: &'static str,
        child: NodeId,
        n_nodes: usize,
    },
    #[error("node {node} references itself as a child")]
    SelfLoop { node: NodeId },
    /// A node was reached by more than one path.
    #[error("node {node} is reachable by more than one path")]
    DuplicateVisit { node: NodeId },
    #[error("cycle detected at node {node}")]
    CycleDetected { node: NodeId },
    #[error("node {node} is unreachable from the root")]
    UnreachableNode { node: NodeId },
    /// Tree contains categorical splits but the category segments are not sized to nodes.
    #[error("categorical segments have length {segments_len}, expected {n_nodes}")]
    CategoricalSegmentsLenMismatch { segments_len: usize, n_nodes: usize },
    /// Leaves of one tree must all carry the same number of outputs.
    #[error("leaf {node} has {width} outputs, expected {expected}")]
    LeafWidthMismatch {
        node: NodeId,
        width: usize,
        expected: usize,
    },
    #[error("covers have length {len}, expected {n_nodes}")]
    CoversLenMismatch { len: usize, n_nodes: usize },
}

// ============================================================================
// Tree
// ============================================================================

/// Structure-of-Arrays tree storage for efficient traversal.
///
/// Stores tree nodes in flat arrays for cache-friendly traversal.
/// Child indices are local to this tree (0 = root).
#[derive(Debug, Clone)]
pub struct Tree<L: LeafValue> {
    split_indices: Box<[u32]>,
    split_thresholds: Box<[f32]>,
    left_children: Box<[u32]>,
    right_children: Box<[u32]>,
    default_left: Box<[bool]>,
    is_leaf: Box<[bool]>,
    leaf_values: Box<[L]>,
    split_types: Box<[SplitType]>,
    categories: CategoriesStorage,
    /// Optional cover (hessian sum) at each node (for explainability).
    covers: Option<Box<[f32]>>,
}

impl<L: LeafValue> Tree<L> {
    /// Create a new tree from parallel arrays.
    ///
    /// All arrays must have the same length (number of nodes). For trees
    /// without categorical splits, pass `SplitType::Numeric` for all nodes
    /// and `CategoriesStorage::empty()`.
    ///
    /// Split nodes still carry a leaf value slot; its content is ignored.
    pub fn new(
        split_indices: Vec<u32>,
        split_thresholds: Vec<f32>,
        left_children: Vec<u32>,
        right_children: Vec<u32>,
        default_left: Vec<bool>,
        is_leaf: Vec<bool>,
        leaf_values: Vec<L>,
        split_types: Vec<SplitType>,
        categories: CategoriesStorage,
    ) -> Self {
        let n_nodes = split_indices.len();
        debug_assert_eq!(n_nodes, split_thresholds.len());
        debug_assert_eq!(n_nodes, left_children.len());
        debug_assert_eq!(n_nodes, right_children.len());
        debug_assert_eq!(n_nodes, default_left.len());
        debug_assert_eq!(n_nodes, is_leaf.len());
        debug_assert_eq!(n_nodes, leaf_values.len());
        debug_assert_eq!(n_nodes, split_types.len());

        Self {
            split_indices: split_indices.into_boxed_slice(),
            split_thresholds: split_thresholds.into_boxed_slice(),
            left_children: left_children.into_boxed_slice(),
            right_children: right_children.into_boxed_slice(),
            default_left: default_left.into_boxed_slice(),
            is_leaf: is_leaf.into_boxed_slice(),
            leaf_values: leaf_values.into_boxed_slice(),
            split_types: split_types.into_boxed_slice(),
            categories,
            covers: None,
        }
    }

    /// A tree made of a single leaf.
    pub fn leaf(value: L) -> Self {
        Self::new(
            vec![0],
            vec![0.0],
            vec![0],
            vec![0],
            vec![false],
            vec![true],
            vec![value],
            vec![SplitType::Numeric],
            CategoriesStorage::empty(),
        )
    }

    // =========================================================================
    // Explainability: Covers
    // =========================================================================

    /// Set the covers for this tree (builder pattern).
    pub fn with_covers(mut self, covers: Vec<f32>) -> Self {
        self.covers = Some(covers.into_boxed_slice());
        self
    }

    /// Cover is the sum of hessians for samples reaching each node.
    pub fn covers(&self) -> Option<&[f32]> {
        self.covers.as_deref()
    }

    /// Whether the root is a split node.
    #[inline]
    pub fn has_splits(&self) -> bool {
        !self.is_leaf.first().copied().unwrap_or(true)
    }

    /// Number of outputs carried by each leaf.
    pub fn leaf_width(&self) -> usize {
        self.leaf_values
            .iter()
            .zip(self.is_leaf.iter())
            .find(|(_, &leaf)| leaf)
            .map_or(0, |(value, _)| value.width())
    }

    /// Depth of the deepest leaf (a single-leaf tree has depth 0).
    pub fn max_depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack: Vec<(NodeId, usize)> = vec![(0, 0)];
        while let Some((node, depth)) = stack.pop() {
            if self.is_leaf(node) {
                max_depth = max_depth.max(depth);
            } else {
                stack.push((self.left_child(node), depth + 1));
                stack.push((self.right_child(node), depth + 1));
            }
        }
        max_depth
    }

    /// Nodes in depth-first pre-order (parents before children).
    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.n_nodes());
        let mut stack: Vec<NodeId> = vec![0];
        while let Some(node) = stack.pop() {
            order.push(node);
            if !self.is_leaf(node) {
                stack.push(self.right_child(node));
                stack.push(self.left_child(node));
            }
        }
        order
    }

    /// Cover-weighted mean output of the subtree rooted at each node.
    ///
    /// Returns a flat `n_nodes * leaf_width` buffer where entry
    /// `node * width + k` is the expected value of output `k` below `node`.
    /// A node with zero cover has mean zero.
    ///
    /// Returns `None` when the tree has splits but no covers.
    pub fn node_mean_values(&self) -> Option<Vec<f64>> {
        let width = self.leaf_width();
        let n_nodes = self.n_nodes();
        let mut means = vec![0.0f64; n_nodes * width];

        if !self.has_splits() {
            for (k, &v) in self.leaf_values[0].values().iter().enumerate() {
                means[k] = f64::from(v);
            }
            return Some(means);
        }

        let covers = self.covers()?;
        // Reverse pre-order visits children before their parent.
        for &node in self.preorder().iter().rev() {
            let n = node as usize;
            if self.is_leaf(node) {
                for (k, &v) in self.leaf_values[n].values().iter().enumerate() {
                    means[n * width + k] = f64::from(v);
                }
                continue;
            }
            let left = self.left_child(node) as usize;
            let right = self.right_child(node) as usize;
            let cover = f64::from(covers[n]);
            for k in 0..width {
                means[n * width + k] = if cover > 0.0 {
                    (means[left * width + k] * f64::from(covers[left])
                        + means[right * width + k] * f64::from(covers[right]))
                        / cover
                } else {
                    0.0
                };
            }
        }
        Some(means)
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate basic structural invariants for this tree.
    pub fn validate(&self) -> Result<(), TreeValidationError> {
        let n_nodes = self.n_nodes();
        if n_nodes == 0 {
            return Err(TreeValidationError::EmptyTree);
        }

        // If categorical splits exist, segments must be indexed by node.
        let has_cat_split = self
            .split_types
            .iter()
            .zip(self.is_leaf.iter())
            .any(|(t, &leaf)| !leaf && matches!(t, SplitType::Categorical));
        if has_cat_split && self.categories.n_segments() != n_nodes {
            return Err(TreeValidationError::CategoricalSegmentsLenMismatch {
                segments_len: self.categories.n_segments(),
                n_nodes,
            });
        }

        if let Some(covers) = &self.covers {
            if covers.len() != n_nodes {
                return Err(TreeValidationError::CoversLenMismatch {
                    len: covers.len(),
                    n_nodes,
                });
            }
        }

        // Iterative DFS with color marking.
        // 0 = unvisited, 1 = visiting, 2 = done
        let mut color = vec![0u8; n_nodes];
        let mut stack: Vec<(NodeId, bool)> = vec![(0, false)];

        while let Some((node, finished)) = stack.pop() {
            let node_usize = node as usize;
            if finished {
                color[node_usize] = 2;
                continue;
            }

            match color[node_usize] {
                0 => {}
                1 => return Err(TreeValidationError::CycleDetected { node }),
                _ => return Err(TreeValidationError::DuplicateVisit { node }),
            }

            color[node_usize] = 1;
            stack.push((node, true));

            if self.is_leaf(node) {
                continue;
            }

            let left = self.left_child(node);
            let right = self.right_child(node);

            if left == node || right == node {
                return Err(TreeValidationError::SelfLoop { node });
            }

            for (side, child) in [("left", left), ("right", right)] {
                if child as usize >= n_nodes {
                    return Err(TreeValidationError::ChildOutOfBounds {
                        node,
                        side,
                        child,
                        n_nodes,
                    });
                }
            }

            stack.push((right, false));
            stack.push((left, false));
        }

        if let Some(i) = color.iter().position(|&c| c == 0) {
            return Err(TreeValidationError::UnreachableNode { node: i as u32 });
        }

        let expected = self.leaf_width();
        for node in (0..n_nodes as NodeId).filter(|&n| self.is_leaf(n)) {
            let width = self.leaf_value(node).width();
            if width != expected || width == 0 {
                return Err(TreeValidationError::LeafWidthMismatch {
                    node,
                    width,
                    expected,
                });
            }
        }

        Ok(())
    }
}

// =============================================================================
// TreeView for Tree
// =============================================================================

impl<L: LeafValue> TreeView for Tree<L> {
    type LeafValue = L;

    #[inline]
    fn n_nodes(&self) -> usize {
        self.is_leaf.len()
    }

    #[inline]
    fn is_leaf(&self, node: NodeId) -> bool {
        self.is_leaf[node as usize]
    }

    #[inline]
    fn split_index(&self, node: NodeId) -> u32 {
        self.split_indices[node as usize]
    }

    #[inline]
    fn split_threshold(&self, node: NodeId) -> f32 {
        self.split_thresholds[node as usize]
    }

    #[inline]
    fn left_child(&self, node: NodeId) -> NodeId {
        self.left_children[node as usize]
    }

    #[inline]
    fn right_child(&self, node: NodeId) -> NodeId {
        self.right_children[node as usize]
    }

    #[inline]
    fn default_left(&self, node: NodeId) -> bool {
        self.default_left[node as usize]
    }

    #[inline]
    fn split_type(&self, node: NodeId) -> SplitType {
        self.split_types[node as usize]
    }

    #[inline]
    fn categories(&self) -> &CategoriesStorage {
        &self.categories
    }

    #[inline]
    fn leaf_value(&self, node: NodeId) -> &L {
        &self.leaf_values[node as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::gbdt::{ScalarLeaf, VectorLeaf};
    use approx::assert_abs_diff_eq;

    fn leaf_of(tree: &Tree<ScalarLeaf>, features: &[f32]) -> f32 {
        let leaf = tree.traverse_to_leaf(features).unwrap();
        tree.leaf_value(leaf).0
    }

    #[test]
    fn predict_simple_tree() {
        // Tree:
        //   root: feat0 < 0.5
        //     left: leaf 1.0
        //     right: leaf 2.0
        let tree = crate::scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => leaf(1.0),
            2 => leaf(2.0),
        };

        assert_eq!(leaf_of(&tree, &[0.3]), 1.0);
        assert_eq!(leaf_of(&tree, &[0.7]), 2.0);
        // Threshold itself goes right.
        assert_eq!(leaf_of(&tree, &[0.5]), 2.0);
    }

    #[test]
    fn missing_and_absent_features_take_default() {
        let tree = crate::scalar_tree! {
            0 => num(1, 0.5, R) -> 1, 2,
            1 => leaf(1.0),
            2 => leaf(2.0),
        };

        assert_eq!(leaf_of(&tree, &[0.0, f32::NAN]), 2.0);
        // Feature 1 does not exist in a one-column row.
        assert_eq!(leaf_of(&tree, &[0.0]), 2.0);
    }

    #[test]
    fn predict_categorical_tree() {
        let tree = crate::scalar_tree! {
            0 => cat(0, [0, 2] | [1, 3], L) -> 1, 2,
            1 => leaf(-1.0),
            2 => leaf(1.0),
        };

        assert_eq!(leaf_of(&tree, &[0.0]), -1.0);
        assert_eq!(leaf_of(&tree, &[1.0]), 1.0);
        assert_eq!(leaf_of(&tree, &[3.0]), 1.0);
        assert_eq!(leaf_of(&tree, &[2.0]), -1.0);
        assert_eq!(leaf_of(&tree, &[f32::NAN]), -1.0);
    }

    #[test]
    fn unknown_category_is_reported() {
        let tree = crate::scalar_tree! {
            0 => cat(3, [0] | [1], R) -> 1, 2,
            1 => leaf(-1.0),
            2 => leaf(1.0),
        };

        let err = tree.traverse_to_leaf(&[0.0, 0.0, 0.0, 7.0][..]).unwrap_err();
        assert_eq!(
            err,
            UnroutableCategory {
                node: 0,
                feature: 3,
                value: 7.0
            }
        );
        assert!(tree.traverse_to_leaf(&[0.0, 0.0, 0.0, -1.0][..]).is_err());
    }

    #[test]
    fn max_depth_of_unbalanced_tree() {
        let tree = crate::scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => leaf(1.0),
            2 => num(1, 0.5, L) -> 3, 4,
            3 => leaf(2.0),
            4 => leaf(3.0),
        };
        assert_eq!(tree.max_depth(), 2);
        assert_eq!(Tree::leaf(ScalarLeaf(1.0)).max_depth(), 0);
    }

    #[test]
    fn node_mean_values_weight_children_by_cover() {
        let tree = crate::scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => leaf(1.0),
            2 => leaf(4.0),
        }
        .with_covers(vec![4.0, 3.0, 1.0]);

        let means = tree.node_mean_values().unwrap();
        assert_abs_diff_eq!(means[0], 1.75);
        assert_abs_diff_eq!(means[1], 1.0);
        assert_abs_diff_eq!(means[2], 4.0);
    }

    #[test]
    fn node_mean_values_need_covers_only_with_splits() {
        let stump = crate::scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => leaf(1.0),
            2 => leaf(4.0),
        };
        assert!(stump.node_mean_values().is_none());
        assert_eq!(
            Tree::leaf(ScalarLeaf(1.5)).node_mean_values(),
            Some(vec![1.5])
        );
    }

    #[test]
    fn vector_means_per_output() {
        let tree = crate::vector_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => leaf([1.0, 0.0]),
            2 => leaf([3.0, 2.0]),
        }
        .with_covers(vec![2.0, 1.0, 1.0]);

        assert_eq!(tree.leaf_width(), 2);
        let means = tree.node_mean_values().unwrap();
        assert_eq!(&means[..2], &[2.0, 1.0]);
    }

    #[test]
    fn validate_rejects_bad_structure() {
        let cycle: Tree<ScalarLeaf> = Tree::new(
            vec![0, 0, 0],
            vec![0.5, 0.5, 0.0],
            vec![1, 0, 0],
            vec![2, 2, 0],
            vec![false; 3],
            vec![false, false, true],
            vec![ScalarLeaf(0.0); 3],
            vec![SplitType::Numeric; 3],
            CategoriesStorage::empty(),
        );
        assert!(matches!(
            cycle.validate(),
            Err(TreeValidationError::CycleDetected { node: 0 })
        ));

        let unreachable: Tree<ScalarLeaf> = Tree::new(
            vec![0, 0],
            vec![0.0, 0.0],
            vec![0, 0],
            vec![0, 0],
            vec![false; 2],
            vec![true, true],
            vec![ScalarLeaf(0.0); 2],
            vec![SplitType::Numeric; 2],
            CategoriesStorage::empty(),
        );
        assert_eq!(
            unreachable.validate(),
            Err(TreeValidationError::UnreachableNode { node: 1 })
        );

        let ragged: Tree<VectorLeaf> = Tree::new(
            vec![0, 0, 0],
            vec![0.5, 0.0, 0.0],
            vec![1, 0, 0],
            vec![2, 0, 0],
            vec![false; 3],
            vec![false, true, true],
            vec![
                VectorLeaf::default(),
                VectorLeaf::new(vec![1.0, 2.0]),
                VectorLeaf::new(vec![1.0]),
            ],
            vec![SplitType::Numeric; 3],
            CategoriesStorage::empty(),
        );
        assert!(matches!(
            ragged.validate(),
            Err(TreeValidationError::LeafWidthMismatch { node: 2, .. })
        ));
    }

    #[test]
    fn validate_checks_covers_length() {
        let tree = crate::scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => leaf(1.0),
            2 => leaf(2.0),
        }
        .with_covers(vec![1.0]);
        assert_eq!(
            tree.validate(),
            Err(TreeValidationError::CoversLenMismatch { len: 1, n_nodes: 3 })
        );
    }
}
