//! Incremental tree construction and tree literal macros.

use super::categories::CategoriesBuilder;
use super::leaf::LeafValue;
use super::node::SplitType;
use super::tree::{Tree, TreeValidationError};
use super::NodeId;

#[derive(Debug, Clone)]
enum NodeSpec<L> {
    Split {
        feature: u32,
        threshold: f32,
        default_left: bool,
        left: NodeId,
        right: NodeId,
        split_type: SplitType,
    },
    Leaf(L),
}

/// Builds a [`Tree`] node by node.
///
/// Nodes may be declared in any order; ids must end up contiguous from 0.
/// [`TreeBuilder::build`] validates the result.
///
/// ```
/// use treeinfer::repr::gbdt::{ScalarLeaf, Tree, TreeBuilder};
///
/// let mut builder = TreeBuilder::<ScalarLeaf>::new();
/// builder
///     .numeric(0, 0, 0.5, true, 1, 2)
///     .leaf(1, 1.0)
///     .leaf(2, 2.0);
/// let tree: Tree<ScalarLeaf> = builder.build().unwrap();
/// assert_eq!(tree.max_depth(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct TreeBuilder<L: LeafValue> {
    nodes: Vec<Option<NodeSpec<L>>>,
    categories: CategoriesBuilder,
    covers: Option<Vec<f32>>,
}

impl<L: LeafValue + Default> Default for TreeBuilder<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LeafValue + Default> TreeBuilder<L> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            categories: CategoriesBuilder::new(),
            covers: None,
        }
    }

    fn set(&mut self, node: NodeId, spec: NodeSpec<L>) -> &mut Self {
        let idx = node as usize;
        if self.nodes.len() <= idx {
            self.nodes.resize(idx + 1, None);
        }
        self.nodes[idx] = Some(spec);
        self
    }

    /// Declare a numeric split `feature < threshold`.
    pub fn numeric(
        &mut self,
        node: NodeId,
        feature: u32,
        threshold: f32,
        default_left: bool,
        left: NodeId,
        right: NodeId,
    ) -> &mut Self {
        self.set(
            node,
            NodeSpec::Split {
                feature,
                threshold,
                default_left,
                left,
                right,
                split_type: SplitType::Numeric,
            },
        )
    }

    /// Declare a categorical split with explicit left and right sets.
    #[allow(clippy::too_many_arguments)]
    pub fn categorical(
        &mut self,
        node: NodeId,
        feature: u32,
        left_categories: &[u32],
        right_categories: &[u32],
        default_left: bool,
        left: NodeId,
        right: NodeId,
    ) -> &mut Self {
        self.categories.push(node, left_categories, right_categories);
        self.set(
            node,
            NodeSpec::Split {
                feature,
                threshold: 0.0,
                default_left,
                left,
                right,
                split_type: SplitType::Categorical,
            },
        )
    }

    pub fn leaf(&mut self, node: NodeId, value: impl Into<L>) -> &mut Self {
        self.set(node, NodeSpec::Leaf(value.into()))
    }

    /// Per-node hessian sums, indexed by node id.
    pub fn covers(&mut self, covers: Vec<f32>) -> &mut Self {
        self.covers = Some(covers);
        self
    }

    pub fn build(self) -> Result<Tree<L>, TreeValidationError> {
        let n_nodes = self.nodes.len();
        let mut split_indices = Vec::with_capacity(n_nodes);
        let mut thresholds = Vec::with_capacity(n_nodes);
        let mut lefts = Vec::with_capacity(n_nodes);
        let mut rights = Vec::with_capacity(n_nodes);
        let mut defaults = Vec::with_capacity(n_nodes);
        let mut is_leaf = Vec::with_capacity(n_nodes);
        let mut values = Vec::with_capacity(n_nodes);
        let mut split_types = Vec::with_capacity(n_nodes);

        for spec in self.nodes {
            match spec {
                Some(NodeSpec::Split {
                    feature,
                    threshold,
                    default_left,
                    left,
                    right,
                    split_type,
                }) => {
                    split_indices.push(feature);
                    thresholds.push(threshold);
                    lefts.push(left);
                    rights.push(right);
                    defaults.push(default_left);
                    is_leaf.push(false);
                    values.push(L::default());
                    split_types.push(split_type);
                }
                // Undeclared ids become leaves; validation reports them as unreachable.
                spec => {
                    let value = match spec {
                        Some(NodeSpec::Leaf(value)) => value,
                        _ => L::default(),
                    };
                    split_indices.push(0);
                    thresholds.push(0.0);
                    lefts.push(0);
                    rights.push(0);
                    defaults.push(false);
                    is_leaf.push(true);
                    values.push(value);
                    split_types.push(SplitType::Numeric);
                }
            }
        }

        let mut tree = Tree::new(
            split_indices,
            thresholds,
            lefts,
            rights,
            defaults,
            is_leaf,
            values,
            split_types,
            self.categories.build(n_nodes),
        );
        if let Some(covers) = self.covers {
            tree = tree.with_covers(covers);
        }
        tree.validate()?;
        Ok(tree)
    }
}

// =============================================================================
// Tree literal macros
// =============================================================================

/// Build a `Tree<ScalarLeaf>` from a node listing.
///
/// ```
/// let tree = treeinfer::scalar_tree! {
///     0 => num(0, 0.5, L) -> 1, 2,
///     1 => leaf(1.0),
///     2 => cat(1, [0, 2] | [1], R) -> 3, 4,
///     3 => leaf(2.0),
///     4 => leaf(3.0),
/// };
/// assert_eq!(tree.max_depth(), 2);
/// ```
///
/// `L`/`R` is the default direction for missing values. Categorical nodes
/// list their left set, then their right set. Panics on an invalid tree.
#[macro_export]
macro_rules! scalar_tree {
    ($($body:tt)*) => {{
        let mut builder =
            $crate::repr::gbdt::TreeBuilder::<$crate::repr::gbdt::ScalarLeaf>::new();
        $crate::__tree_nodes!(builder; $($body)*);
        builder.build().expect("invalid tree literal")
    }};
}

/// Build a `Tree<VectorLeaf>`; leaves are written `leaf([v0, v1, ...])`.
#[macro_export]
macro_rules! vector_tree {
    ($($body:tt)*) => {{
        let mut builder =
            $crate::repr::gbdt::TreeBuilder::<$crate::repr::gbdt::VectorLeaf>::new();
        $crate::__tree_nodes!(builder; $($body)*);
        builder.build().expect("invalid tree literal")
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __tree_nodes {
    ($b:ident; ) => {};
    ($b:ident; $id:literal => num($f:expr, $t:expr, $d:ident) -> $l:literal, $r:literal $(, $($rest:tt)*)?) => {
        $b.numeric($id, $f, $t, $crate::__default_left!($d), $l, $r);
        $crate::__tree_nodes!($b; $($($rest)*)?);
    };
    ($b:ident; $id:literal => cat($f:expr, [$($lc:expr),*] | [$($rc:expr),*], $d:ident) -> $l:literal, $r:literal $(, $($rest:tt)*)?) => {
        $b.categorical($id, $f, &[$($lc),*], &[$($rc),*], $crate::__default_left!($d), $l, $r);
        $crate::__tree_nodes!($b; $($($rest)*)?);
    };
    ($b:ident; $id:literal => leaf([$($v:expr),* $(,)?]) $(, $($rest:tt)*)?) => {
        $b.leaf($id, $crate::repr::gbdt::VectorLeaf::new(vec![$($v),*]));
        $crate::__tree_nodes!($b; $($($rest)*)?);
    };
    ($b:ident; $id:literal => leaf($v:expr) $(, $($rest:tt)*)?) => {
        $b.leaf($id, $crate::repr::gbdt::ScalarLeaf($v));
        $crate::__tree_nodes!($b; $($($rest)*)?);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __default_left {
    (L) => {
        true
    };
    (R) => {
        false
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::gbdt::{ScalarLeaf, TreeView};

    #[test]
    fn builder_accepts_any_declaration_order() {
        let mut builder = TreeBuilder::<ScalarLeaf>::new();
        builder
            .leaf(2, 2.0)
            .leaf(1, 1.0)
            .numeric(0, 3, 0.25, false, 1, 2)
            .covers(vec![3.0, 1.0, 2.0]);
        let tree = builder.build().unwrap();

        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.split_index(0), 3);
        assert!(!tree.default_left(0));
        assert_eq!(tree.covers(), Some(&[3.0, 1.0, 2.0][..]));
    }

    #[test]
    fn builder_reports_gaps() {
        let mut builder = TreeBuilder::<ScalarLeaf>::new();
        builder.numeric(0, 0, 0.5, true, 1, 3).leaf(1, 1.0).leaf(3, 3.0);
        assert_eq!(
            builder.build().unwrap_err(),
            TreeValidationError::UnreachableNode { node: 2 }
        );
    }

    #[test]
    fn macro_builds_categorical_split() {
        let tree = crate::scalar_tree! {
            0 => cat(2, [5] | [1, 7], R) -> 1, 2,
            1 => leaf(-1.0),
            2 => leaf(1.0),
        };
        assert_eq!(tree.split_type(0), SplitType::Categorical);
        assert_eq!(tree.categories().left_bitset(0), &[1 << 5]);
    }
}
