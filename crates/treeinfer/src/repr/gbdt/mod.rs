//! Gradient-boosted decision tree (GBDT) canonical representations.

/// Canonical node identifier used by the GBDT representation.
///
/// Internally this is just an index into the tree's SoA arrays.
pub type NodeId = u32;

pub mod builder;
pub mod categories;
pub mod forest;
pub mod leaf;
pub mod node;
pub mod tree;

pub use builder::TreeBuilder;
pub use categories::{categories_to_bitset, float_to_category, CategoriesBuilder, CategoriesStorage};
pub use forest::{Forest, ForestValidationError, TreeRange};
pub use leaf::{LeafValue, ScalarLeaf, VectorLeaf};
pub use node::{Direction, SplitType};
pub use tree::{Tree, TreeValidationError, TreeView, UnroutableCategory};
