//! Canonical forest representation (collection of trees).

use serde::{Deserialize, Serialize};

use crate::error::PredictError;

use super::{tree::TreeValidationError, LeafValue, ScalarLeaf, Tree, TreeView};

/// Structural validation errors for [`Forest`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForestValidationError {
    #[error("base score has {len} values for {n_groups} groups")]
    BaseScoreLenMismatch { n_groups: u32, len: usize },
    #[error("tree {tree_idx} belongs to group {group}, but the forest has {n_groups} groups")]
    TreeGroupOutOfRange {
        tree_idx: usize,
        group: u32,
        n_groups: u32,
    },
    /// Vector-leaf trees must produce one value per output group.
    #[error("tree {tree_idx} has {width}-wide leaves, expected {n_groups}")]
    LeafWidthMismatch {
        tree_idx: usize,
        width: usize,
        n_groups: u32,
    },
    #[error("tree {tree_idx} has non-finite weight {weight}")]
    InvalidTreeWeight { tree_idx: usize, weight: f32 },
    #[error("tree {tree_idx} splits on feature {feature}, but the model has {n_features} features")]
    FeatureOutOfRange {
        tree_idx: usize,
        feature: u32,
        n_features: usize,
    },
    #[error("a forest needs at least one tree per round and one output group")]
    EmptyRound,
    #[error("tree {tree_idx}: {error}")]
    InvalidTree {
        tree_idx: usize,
        error: TreeValidationError,
    },
}

// =============================================================================
// TreeRange
// =============================================================================

/// Half-open range of tree indices `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TreeRange {
    pub begin: usize,
    pub end: usize,
}

impl TreeRange {
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    /// `[0, 0)`, which [`Forest::tree_range`] resolves to every tree.
    pub fn all() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn iter(&self) -> std::ops::Range<usize> {
        self.begin..self.end
    }
}

impl IntoIterator for TreeRange {
    type Item = usize;
    type IntoIter = std::ops::Range<usize>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Forest
// =============================================================================

/// Forest of decision trees.
///
/// Stores trees with their group assignments and optional per-tree weights.
///
/// # Output layouts
///
/// - Scalar leaves: one tree per output group per round. A tree adds its leaf
///   value to its own group.
/// - Vector leaves: every tree writes all `n_groups` outputs; all trees are
///   assigned group 0.
///
/// A boosting round holds `trees_per_round()` trees (`n_groups` for scalar
/// leaves, times the number of parallel trees grown per round).
#[derive(Debug, Clone)]
pub struct Forest<L: LeafValue = ScalarLeaf> {
    trees: Vec<Tree<L>>,
    tree_groups: Vec<u32>,
    tree_weights: Vec<f32>,
    n_groups: u32,
    base_score: Vec<f32>,
    n_features: Option<usize>,
    parallel_trees: usize,
}

impl<L: LeafValue> Forest<L> {
    /// Create a new forest with the given number of groups.
    pub fn new(n_groups: u32) -> Self {
        Self {
            trees: Vec::new(),
            tree_groups: Vec::new(),
            tree_weights: Vec::new(),
            n_groups,
            base_score: vec![0.0; n_groups as usize],
            n_features: None,
            parallel_trees: 1,
        }
    }

    /// Create a forest for regression (single output group).
    pub fn for_regression() -> Self {
        Self::new(1)
    }

    /// Set the base score for all groups.
    pub fn with_base_score(mut self, base_score: Vec<f32>) -> Self {
        self.base_score = base_score;
        self
    }

    /// Declare the number of features the model was trained on.
    ///
    /// Without it, the feature count is inferred from the largest split index.
    pub fn with_n_features(mut self, n_features: usize) -> Self {
        self.n_features = Some(n_features);
        self
    }

    /// Number of trees grown per group in one boosting round (random forests).
    pub fn with_parallel_trees(mut self, parallel_trees: usize) -> Self {
        self.parallel_trees = parallel_trees;
        self
    }

    /// Add a tree to the forest.
    pub fn push_tree(&mut self, tree: Tree<L>, group: u32) {
        self.push_weighted_tree(tree, group, 1.0);
    }

    /// Add a tree whose contribution is scaled by `weight` (DART-style).
    pub fn push_weighted_tree(&mut self, tree: Tree<L>, group: u32, weight: f32) {
        self.trees.push(tree);
        self.tree_groups.push(group);
        self.tree_weights.push(weight);
    }

    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    #[inline]
    pub fn n_groups(&self) -> u32 {
        self.n_groups
    }

    /// Get the base score for each group.
    #[inline]
    pub fn base_score(&self) -> &[f32] {
        &self.base_score
    }

    #[inline]
    pub fn tree(&self, idx: usize) -> &Tree<L> {
        &self.trees[idx]
    }

    #[inline]
    pub fn tree_groups(&self) -> &[u32] {
        &self.tree_groups
    }

    #[inline]
    pub fn tree_weight(&self, idx: usize) -> f32 {
        self.tree_weights[idx]
    }

    pub fn trees(&self) -> impl Iterator<Item = &Tree<L>> {
        self.trees.iter()
    }

    /// Whether trees carry one value per output group.
    #[inline]
    pub fn is_vector_leaf(&self) -> bool {
        L::IS_VECTOR
    }

    /// First output slot written by a tree.
    ///
    /// Scalar trees write their group; vector trees write slots `0..n_groups`.
    #[inline]
    pub fn output_offset(&self, tree_idx: usize) -> usize {
        if L::IS_VECTOR {
            0
        } else {
            self.tree_groups[tree_idx] as usize
        }
    }

    /// Number of features the model expects.
    pub fn n_features(&self) -> usize {
        self.n_features.unwrap_or_else(|| self.inferred_n_features())
    }

    fn inferred_n_features(&self) -> usize {
        self.trees
            .iter()
            .flat_map(|tree| {
                (0..tree.n_nodes() as u32)
                    .filter(|&n| !tree.is_leaf(n))
                    .map(|n| tree.split_index(n) as usize + 1)
            })
            .max()
            .unwrap_or(0)
    }

    /// Depth of the deepest tree.
    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(Tree::max_depth).max().unwrap_or(0)
    }

    // =========================================================================
    // Rounds and ranges
    // =========================================================================

    /// Number of trees added per boosting round.
    #[inline]
    pub fn trees_per_round(&self) -> usize {
        let per_group = if L::IS_VECTOR { 1 } else { self.n_groups as usize };
        per_group * self.parallel_trees
    }

    /// Number of (possibly incomplete) boosting rounds.
    pub fn n_rounds(&self) -> usize {
        match self.trees_per_round() {
            0 => 0,
            per_round => self.n_trees().div_ceil(per_round),
        }
    }

    /// Resolve a tree range; `end == 0` means "through the last tree".
    pub fn tree_range(&self, begin: usize, end: usize) -> Result<TreeRange, PredictError> {
        let n_trees = self.n_trees();
        let end = if end == 0 { n_trees } else { end };
        if begin > end || end > n_trees {
            return Err(PredictError::InvalidTreeRange {
                begin,
                end,
                n_trees,
            });
        }
        Ok(TreeRange::new(begin, end))
    }

    /// Resolve a boosting round range to the trees it covers.
    ///
    /// `end_round == 0` means "through the last round".
    pub fn round_range(&self, begin_round: usize, end_round: usize) -> Result<TreeRange, PredictError> {
        let per_round = self.trees_per_round();
        let end_round = if end_round == 0 { self.n_rounds() } else { end_round };
        if begin_round > end_round || end_round > self.n_rounds() {
            return Err(PredictError::InvalidTreeRange {
                begin: begin_round * per_round,
                end: end_round * per_round,
                n_trees: self.n_trees(),
            });
        }
        let begin = (begin_round * per_round).min(self.n_trees());
        let end = (end_round * per_round).min(self.n_trees());
        Ok(TreeRange::new(begin, end))
    }

    /// Copy out the rounds `begin_round, begin_round + step, ...` below `end_round`.
    ///
    /// Tree weights, base score, and feature count carry over.
    pub fn slice(&self, begin_round: usize, end_round: usize, step: usize) -> Result<Self, PredictError> {
        let range = self.round_range(begin_round, end_round)?;
        let per_round = self.trees_per_round();
        if step == 0 || per_round == 0 {
            return Err(PredictError::InvalidTreeRange {
                begin: range.begin,
                end: range.end,
                n_trees: self.n_trees(),
            });
        }

        let mut sliced = Self {
            trees: Vec::new(),
            tree_groups: Vec::new(),
            tree_weights: Vec::new(),
            n_groups: self.n_groups,
            base_score: self.base_score.clone(),
            n_features: Some(self.n_features()),
            parallel_trees: self.parallel_trees,
        };
        for round_start in range.iter().step_by(per_round * step) {
            for idx in round_start..(round_start + per_round).min(range.end) {
                sliced.push_weighted_tree(
                    self.trees[idx].clone(),
                    self.tree_groups[idx],
                    self.tree_weights[idx],
                );
            }
        }
        log::debug!(
            "sliced rounds [{begin_round}, {end_round}) step {step}: {} of {} trees",
            sliced.n_trees(),
            self.n_trees()
        );
        Ok(sliced)
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate structural invariants for this forest (trees, group assignments,
    /// weights, base score).
    pub fn validate(&self) -> Result<(), ForestValidationError> {
        if self.n_groups == 0 || self.parallel_trees == 0 {
            return Err(ForestValidationError::EmptyRound);
        }
        if self.base_score.len() != self.n_groups as usize {
            return Err(ForestValidationError::BaseScoreLenMismatch {
                n_groups: self.n_groups,
                len: self.base_score.len(),
            });
        }

        for (tree_idx, tree) in self.trees.iter().enumerate() {
            tree.validate()
                .map_err(|error| ForestValidationError::InvalidTree { tree_idx, error })?;

            let group = self.tree_groups[tree_idx];
            let allowed_groups = if L::IS_VECTOR { 1 } else { self.n_groups };
            if group >= allowed_groups {
                return Err(ForestValidationError::TreeGroupOutOfRange {
                    tree_idx,
                    group,
                    n_groups: allowed_groups,
                });
            }

            let expected_width = if L::IS_VECTOR { self.n_groups as usize } else { 1 };
            if tree.leaf_width() != expected_width {
                return Err(ForestValidationError::LeafWidthMismatch {
                    tree_idx,
                    width: tree.leaf_width(),
                    n_groups: self.n_groups,
                });
            }

            let weight = self.tree_weights[tree_idx];
            if !weight.is_finite() {
                return Err(ForestValidationError::InvalidTreeWeight { tree_idx, weight });
            }

            if let Some(n_features) = self.n_features {
                let out_of_range = (0..tree.n_nodes() as u32)
                    .filter(|&n| !tree.is_leaf(n))
                    .map(|n| tree.split_index(n))
                    .find(|&f| f as usize >= n_features);
                if let Some(feature) = out_of_range {
                    return Err(ForestValidationError::FeatureOutOfRange {
                        tree_idx,
                        feature,
                        n_features,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::gbdt::VectorLeaf;

    fn build_simple_tree(left_val: f32, right_val: f32, threshold: f32) -> Tree<ScalarLeaf> {
        crate::scalar_tree! {
            0 => num(0, threshold, L) -> 1, 2,
            1 => leaf(left_val),
            2 => leaf(right_val),
        }
    }

    fn multiclass_forest(n_rounds: usize) -> Forest<ScalarLeaf> {
        let mut forest = Forest::new(3);
        for round in 0..n_rounds {
            for group in 0..3 {
                let v = (round * 3 + group) as f32;
                forest.push_tree(build_simple_tree(v, -v, 0.5), group as u32);
            }
        }
        forest
    }

    #[test]
    fn rounds_group_trees_per_class() {
        let forest = multiclass_forest(4);
        assert_eq!(forest.trees_per_round(), 3);
        assert_eq!(forest.n_rounds(), 4);
        assert_eq!(forest.round_range(1, 3).unwrap(), TreeRange::new(3, 9));
        assert_eq!(forest.round_range(0, 0).unwrap(), TreeRange::new(0, 12));
        assert!(forest.round_range(2, 5).is_err());
        assert!(forest.round_range(3, 2).is_err());
    }

    #[test]
    fn parallel_trees_widen_rounds() {
        let mut forest = Forest::new(2).with_base_score(vec![0.0, 0.0]).with_parallel_trees(2);
        for round in 0..3 {
            for group in [0, 0, 1, 1] {
                forest.push_tree(build_simple_tree(round as f32, 0.0, 0.5), group);
            }
        }
        assert_eq!(forest.trees_per_round(), 4);
        assert_eq!(forest.n_rounds(), 3);
        assert_eq!(forest.round_range(1, 2).unwrap(), TreeRange::new(4, 8));

        let sliced = forest.slice(1, 3, 1).unwrap();
        assert_eq!(sliced.n_trees(), 8);
        assert_eq!(sliced.tree(0).leaf_value(1).0, 1.0);
        assert!(sliced.validate().is_ok());
    }

    #[test]
    fn tree_range_defaults_to_full() {
        let forest = multiclass_forest(2);
        assert_eq!(forest.tree_range(0, 0).unwrap(), TreeRange::new(0, 6));
        assert_eq!(forest.tree_range(2, 4).unwrap().len(), 2);
        assert!(matches!(
            forest.tree_range(0, 7),
            Err(PredictError::InvalidTreeRange { n_trees: 6, .. })
        ));
    }

    #[test]
    fn slice_keeps_whole_rounds() {
        let forest = multiclass_forest(4).with_base_score(vec![0.1, 0.2, 0.3]);
        let sliced = forest.slice(0, 4, 2).unwrap();

        assert_eq!(sliced.n_trees(), 6);
        assert_eq!(sliced.tree_groups(), &[0, 1, 2, 0, 1, 2]);
        assert_eq!(sliced.base_score(), &[0.1, 0.2, 0.3]);
        // Round 2 starts at tree 6, whose left leaf is 6.0.
        assert_eq!(sliced.tree(3).leaf_value(1).0, 6.0);
        assert!(forest.slice(0, 4, 0).is_err());
    }

    #[test]
    fn n_features_inferred_or_explicit() {
        let mut forest = Forest::for_regression();
        forest.push_tree(
            crate::scalar_tree! {
                0 => num(4, 0.5, L) -> 1, 2,
                1 => leaf(1.0),
                2 => leaf(2.0),
            },
            0,
        );
        assert_eq!(forest.n_features(), 5);
        let forest = forest.with_n_features(10);
        assert_eq!(forest.n_features(), 10);
        assert!(forest.validate().is_ok());
    }

    #[test]
    fn validate_catches_inconsistencies() {
        let mut forest = Forest::new(2).with_base_score(vec![0.5]);
        forest.push_tree(build_simple_tree(1.0, 2.0, 0.5), 0);
        assert!(matches!(
            forest.validate(),
            Err(ForestValidationError::BaseScoreLenMismatch { .. })
        ));

        let mut forest = Forest::new(2);
        forest.push_tree(build_simple_tree(1.0, 2.0, 0.5), 2);
        assert!(matches!(
            forest.validate(),
            Err(ForestValidationError::TreeGroupOutOfRange { tree_idx: 0, .. })
        ));

        let mut forest = Forest::for_regression();
        forest.push_weighted_tree(build_simple_tree(1.0, 2.0, 0.5), 0, f32::NAN);
        assert!(matches!(
            forest.validate(),
            Err(ForestValidationError::InvalidTreeWeight { tree_idx: 0, .. })
        ));

        let mut forest = Forest::for_regression().with_n_features(0);
        forest.push_tree(build_simple_tree(1.0, 2.0, 0.5), 0);
        assert!(matches!(
            forest.validate(),
            Err(ForestValidationError::FeatureOutOfRange { feature: 0, .. })
        ));
    }

    #[test]
    fn vector_forest_needs_matching_width() {
        let tree = crate::vector_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => leaf([1.0, 2.0]),
            2 => leaf([3.0, 4.0]),
        };
        let mut forest: Forest<VectorLeaf> = Forest::new(2);
        forest.push_tree(tree.clone(), 0);
        assert!(forest.validate().is_ok());
        assert_eq!(forest.trees_per_round(), 1);
        assert_eq!(forest.output_offset(0), 0);

        let mut forest: Forest<VectorLeaf> = Forest::new(3);
        forest.push_tree(tree, 0);
        assert!(matches!(
            forest.validate(),
            Err(ForestValidationError::LeafWidthMismatch { width: 2, .. })
        ));
    }
}
