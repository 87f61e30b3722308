//! Contribution visitors plugged into the row-block driver.

use crate::error::PredictError;
use crate::inference::traversal::{MarginInit, TreeVisitor};
use crate::repr::gbdt::{Forest, LeafValue, TreeRange, TreeView};

use super::tree_shap::{approximate_shap, path_buffer_len, tree_shap, Condition, PathElement};

/// Per-tree data shared by the contribution visitors.
#[derive(Debug)]
struct ExplainedTrees<'a, L: LeafValue> {
    forest: &'a Forest<L>,
    range: TreeRange,
    /// Node mean values of every tree in `range`.
    means: Vec<Vec<f64>>,
    path_len: usize,
    n_features: usize,
    init: MarginInit<'a>,
}

impl<'a, L: LeafValue> ExplainedTrees<'a, L> {
    fn new(forest: &'a Forest<L>, range: TreeRange, init: MarginInit<'a>) -> Result<Self, PredictError> {
        let means = range
            .iter()
            .map(|tree_idx| {
                forest
                    .tree(tree_idx)
                    .node_mean_values()
                    .ok_or(PredictError::MissingCovers { tree_idx })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let max_depth = range.iter().map(|t| forest.tree(t).max_depth()).max().unwrap_or(0);

        Ok(Self {
            forest,
            range,
            means,
            path_len: path_buffer_len(max_depth),
            n_features: forest.n_features(),
            init,
        })
    }

    #[inline]
    fn side(&self) -> usize {
        self.n_features + 1
    }

    #[inline]
    fn means(&self, tree_idx: usize) -> &[f64] {
        &self.means[tree_idx - self.range.begin]
    }

    fn tree_phi_len(&self) -> usize {
        self.forest.n_groups() as usize * self.side()
    }

    #[inline]
    fn margin(&self, row: usize, group: usize) -> f64 {
        f64::from(self.init.value(self.forest.base_score(), row, group))
    }

    /// Add `weight * phi` for a tree into a row's `[group][feature + bias]` output.
    #[inline]
    fn accumulate(&self, tree_idx: usize, phi: &[f64], out: &mut [f64]) {
        let side = self.side();
        let weight = f64::from(self.forest.tree_weight(tree_idx));
        let offset = self.forest.output_offset(tree_idx) * side;
        let width = self.forest.tree(tree_idx).leaf_width();
        for (slot, &v) in out[offset..offset + width * side].iter_mut().zip(&phi[..width * side]) {
            *slot += weight * v;
        }
    }
}

/// Per-thread buffers for one row's tree pass.
pub(crate) struct ShapScratch {
    path: Vec<PathElement>,
    phi: Vec<f64>,
}

/// Per-feature contributions, `[group][feature + bias]` per row.
#[derive(Debug)]
pub(crate) struct ContributionVisitor<'a, L: LeafValue> {
    trees: ExplainedTrees<'a, L>,
    approximate: bool,
}

impl<'a, L: LeafValue> ContributionVisitor<'a, L> {
    /// Fails with [`PredictError::MissingCovers`] when a tree in `range` has
    /// splits but no covers.
    pub(crate) fn new(
        forest: &'a Forest<L>,
        range: TreeRange,
        init: MarginInit<'a>,
        approximate: bool,
    ) -> Result<Self, PredictError> {
        Ok(Self {
            trees: ExplainedTrees::new(forest, range, init)?,
            approximate,
        })
    }

    pub(crate) fn n_features(&self) -> usize {
        self.trees.n_features
    }
}

impl<L: LeafValue> TreeVisitor for ContributionVisitor<'_, L> {
    type Out = f64;
    type Scratch = ShapScratch;

    fn stride(&self) -> usize {
        self.trees.tree_phi_len()
    }

    fn new_scratch(&self) -> ShapScratch {
        ShapScratch {
            path: vec![PathElement::default(); self.trees.path_len],
            phi: vec![0.0; self.trees.tree_phi_len()],
        }
    }

    fn init_row(&self, row: usize, out: &mut [f64]) {
        let side = self.trees.side();
        for (group, values) in out.chunks_mut(side).enumerate() {
            values.fill(0.0);
            values[side - 1] = self.trees.margin(row, group);
        }
    }

    fn visit_tree(
        &self,
        tree_idx: usize,
        sample: &[f32],
        scratch: &mut ShapScratch,
        out: &mut [f64],
    ) -> Result<(), PredictError> {
        let tree = self.trees.forest.tree(tree_idx);
        let means = self.trees.means(tree_idx);
        let side = self.trees.side();
        scratch.phi.fill(0.0);

        if self.approximate {
            approximate_shap(tree, means, sample, &mut scratch.phi, side)
        } else {
            tree_shap(tree, means, sample, &mut scratch.path, Condition::None, &mut scratch.phi, side)
        }
        .map_err(|e| e.in_tree(tree_idx))?;

        self.trees.accumulate(tree_idx, &scratch.phi, out);
        Ok(())
    }
}

/// Per-thread buffers for interaction values.
pub(crate) struct InteractionScratch {
    path: Vec<PathElement>,
    diag: Vec<f64>,
    on: Vec<f64>,
    off: Vec<f64>,
}

/// SHAP interaction values, `[group][feature + bias][feature + bias]` per row.
///
/// Off-diagonal entries are half the difference between the feature's
/// contributions conditioned on and off; diagonal entries take the rest of
/// each feature's contribution so every matrix row sums to it. In
/// approximate mode only the diagonal is filled.
#[derive(Debug)]
pub(crate) struct InteractionVisitor<'a, L: LeafValue> {
    trees: ExplainedTrees<'a, L>,
    /// Distinct split features of every tree in the range.
    split_features: Vec<Vec<u32>>,
    approximate: bool,
}

impl<'a, L: LeafValue> InteractionVisitor<'a, L> {
    pub(crate) fn new(
        forest: &'a Forest<L>,
        range: TreeRange,
        init: MarginInit<'a>,
        approximate: bool,
    ) -> Result<Self, PredictError> {
        let split_features = range
            .iter()
            .map(|tree_idx| {
                let tree = forest.tree(tree_idx);
                let mut features: Vec<u32> = (0..tree.n_nodes() as u32)
                    .filter(|&node| !tree.is_leaf(node))
                    .map(|node| tree.split_index(node))
                    .collect();
                features.sort_unstable();
                features.dedup();
                features
            })
            .collect();

        Ok(Self {
            trees: ExplainedTrees::new(forest, range, init)?,
            split_features,
            approximate,
        })
    }

    pub(crate) fn n_features(&self) -> usize {
        self.trees.n_features
    }
}

impl<L: LeafValue> TreeVisitor for InteractionVisitor<'_, L> {
    type Out = f64;
    type Scratch = InteractionScratch;

    fn stride(&self) -> usize {
        self.trees.tree_phi_len() * self.trees.side()
    }

    fn new_scratch(&self) -> InteractionScratch {
        let len = self.trees.tree_phi_len();
        InteractionScratch {
            path: vec![PathElement::default(); self.trees.path_len],
            diag: vec![0.0; len],
            on: vec![0.0; len],
            off: vec![0.0; len],
        }
    }

    fn init_row(&self, row: usize, out: &mut [f64]) {
        let side = self.trees.side();
        for (group, matrix) in out.chunks_mut(side * side).enumerate() {
            matrix.fill(0.0);
            matrix[side * side - 1] = self.trees.margin(row, group);
        }
    }

    fn visit_tree(
        &self,
        tree_idx: usize,
        sample: &[f32],
        scratch: &mut InteractionScratch,
        out: &mut [f64],
    ) -> Result<(), PredictError> {
        let trees = &self.trees;
        let tree = trees.forest.tree(tree_idx);
        let means = trees.means(tree_idx);
        let side = trees.side();
        let weight = f64::from(trees.forest.tree_weight(tree_idx));
        let offset = trees.forest.output_offset(tree_idx);
        let width = tree.leaf_width();

        scratch.diag.fill(0.0);
        if self.approximate {
            approximate_shap(tree, means, sample, &mut scratch.diag, side)
        } else {
            tree_shap(tree, means, sample, &mut scratch.path, Condition::None, &mut scratch.diag, side)
        }
        .map_err(|e| e.in_tree(tree_idx))?;

        for k in 0..width {
            let matrix = &mut out[(offset + k) * side * side..(offset + k + 1) * side * side];
            for i in 0..side {
                matrix[i * side + i] += weight * scratch.diag[k * side + i];
            }
        }
        if self.approximate {
            return Ok(());
        }

        for &feature in &self.split_features[tree_idx - trees.range.begin] {
            scratch.on.fill(0.0);
            scratch.off.fill(0.0);
            tree_shap(tree, means, sample, &mut scratch.path, Condition::On(feature), &mut scratch.on, side)
                .and_then(|_| {
                    tree_shap(tree, means, sample, &mut scratch.path, Condition::Off(feature), &mut scratch.off, side)
                })
                .map_err(|e| e.in_tree(tree_idx))?;

            let i = feature as usize;
            for k in 0..width {
                let matrix = &mut out[(offset + k) * side * side..(offset + k + 1) * side * side];
                let on = &scratch.on[k * side..(k + 1) * side];
                let off = &scratch.off[k * side..(k + 1) * side];
                for j in (0..side).filter(|&j| j != i) {
                    let interaction = weight * (on[j] - off[j]) / 2.0;
                    matrix[i * side + j] += interaction;
                    matrix[i * side + i] -= interaction;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use crate::inference::traversal::{visit_rows, BlockPlan};
    use crate::repr::gbdt::{ScalarLeaf, Tree};
    use crate::utils::Parallelism;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn forest() -> Forest<ScalarLeaf> {
        let mut forest = Forest::for_regression().with_base_score(vec![0.5]);
        forest.push_tree(
            crate::scalar_tree! {
                0 => num(0, 0.5, L) -> 1, 2,
                1 => num(1, 0.5, L) -> 3, 4,
                2 => leaf(2.0),
                3 => leaf(-1.0),
                4 => leaf(1.0),
            }
            .with_covers(vec![10.0, 6.0, 4.0, 3.0, 3.0]),
            0,
        );
        forest.push_weighted_tree(
            crate::scalar_tree! {
                0 => num(1, 0.3, R) -> 1, 2,
                1 => leaf(0.5),
                2 => leaf(-0.5),
            }
            .with_covers(vec![10.0, 5.0, 5.0]),
            0,
            0.5,
        );
        forest
    }

    fn run<V: TreeVisitor<Out = f64>>(visitor: &V, dataset: &Dataset) -> Vec<f64> {
        let mut out = vec![0.0; dataset.n_rows() * visitor.stride()];
        let plan = BlockPlan {
            range: TreeRange::new(0, 2),
            n_features: 2,
            block_size: 2,
            parallelism: Parallelism::Sequential,
        };
        visit_rows(dataset, visitor, plan, &mut out).unwrap();
        out
    }

    fn dataset() -> Dataset {
        Dataset::from_dense(array![[0.2f32, 0.7], [0.8, 0.1], [f32::NAN, f32::NAN]])
    }

    #[test]
    fn exact_contributions_sum_to_prediction() {
        let forest = forest();
        let visitor = ContributionVisitor::new(&forest, TreeRange::new(0, 2), MarginInit::BaseScore, false).unwrap();
        let out = run(&visitor, &dataset());

        // predictions: 0.5 + tree0 + 0.5 * tree1
        let expected = [0.5 + 1.0 - 0.25, 0.5 + 2.0 + 0.25, 0.5 - 1.0 - 0.25];
        for (row, &prediction) in expected.iter().enumerate() {
            let total: f64 = out[row * 3..(row + 1) * 3].iter().sum();
            assert_abs_diff_eq!(total, prediction, epsilon = 1e-9);
        }

        // bias: base score + root means (tree0: 0.6 * 0 + 0.4 * 2 = 0.8, tree1: 0)
        assert_abs_diff_eq!(out[2], 0.5 + 0.8, epsilon = 1e-9);
    }

    #[test]
    fn approximate_contributions_sum_to_prediction() {
        let forest = forest();
        let visitor = ContributionVisitor::new(&forest, TreeRange::new(0, 2), MarginInit::BaseScore, true).unwrap();
        let out = run(&visitor, &dataset());
        let total: f64 = out[3..6].iter().sum();
        assert_abs_diff_eq!(total, 2.75, epsilon = 1e-9);
    }

    #[test]
    fn missing_covers_rejected() {
        let mut forest = Forest::for_regression();
        forest.push_tree(
            crate::scalar_tree! {
                0 => num(0, 0.5, L) -> 1, 2,
                1 => leaf(1.0),
                2 => leaf(2.0),
            },
            0,
        );
        forest.push_tree(Tree::leaf(ScalarLeaf(1.0)), 0);
        let err = ContributionVisitor::new(&forest, TreeRange::new(0, 2), MarginInit::BaseScore, false).unwrap_err();
        assert_eq!(err, PredictError::MissingCovers { tree_idx: 0 });

        // The leaf-only tree needs no covers.
        assert!(ContributionVisitor::new(&forest, TreeRange::new(1, 2), MarginInit::BaseScore, false).is_ok());
    }

    #[test]
    fn interaction_rows_sum_to_contributions() {
        let forest = forest();
        let contributions =
            run(&ContributionVisitor::new(&forest, TreeRange::new(0, 2), MarginInit::BaseScore, false).unwrap(), &dataset());
        let interactions =
            run(&InteractionVisitor::new(&forest, TreeRange::new(0, 2), MarginInit::BaseScore, false).unwrap(), &dataset());

        for row in 0..3 {
            for i in 0..3 {
                let start = row * 9 + i * 3;
                let sum: f64 = interactions[start..start + 3].iter().sum();
                assert_abs_diff_eq!(sum, contributions[row * 3 + i], epsilon = 1e-9);
            }
            // symmetric
            assert_abs_diff_eq!(interactions[row * 9 + 1], interactions[row * 9 + 3], epsilon = 1e-9);
            // bias row has no interactions
            assert_eq!(interactions[row * 9 + 6], 0.0);
            assert_eq!(interactions[row * 9 + 7], 0.0);
        }
    }

    #[test]
    fn approximate_interactions_are_diagonal() {
        let forest = forest();
        let approx =
            run(&ContributionVisitor::new(&forest, TreeRange::new(0, 2), MarginInit::BaseScore, true).unwrap(), &dataset());
        let interactions =
            run(&InteractionVisitor::new(&forest, TreeRange::new(0, 2), MarginInit::BaseScore, true).unwrap(), &dataset());
        for row in 0..3 {
            for i in 0..3 {
                for j in 0..3 {
                    let value = interactions[row * 9 + i * 3 + j];
                    if i == j {
                        assert_abs_diff_eq!(value, approx[row * 3 + i], epsilon = 1e-12);
                    } else {
                        assert_eq!(value, 0.0);
                    }
                }
            }
        }
    }
}
