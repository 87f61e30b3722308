//! Tree SHAP recursion (Lundberg et al., "Consistent Individualized Feature
//! Attribution for Tree Ensembles") and the single-path approximation.
//!
//! Both functions accumulate one tree's attributions into `phi`, laid out as
//! `[output][feature + bias]` with `stride = n_features + 1`. Neither applies
//! tree weights; callers scale the result.

use crate::data::SampleAccessor;
use crate::repr::gbdt::{LeafValue, NodeId, Tree, TreeView, UnroutableCategory};

/// One entry of the unique feature path.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PathElement {
    /// Split feature; `None` for the root sentinel.
    feature: Option<u32>,
    /// Fraction of zero paths (feature absent) flowing through this branch.
    zero_fraction: f64,
    /// Fraction of one paths (feature present) flowing through this branch.
    one_fraction: f64,
    /// Permutation weight.
    pweight: f64,
}

/// Conditioning used by interaction values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Condition {
    None,
    /// The feature is always present.
    On(u32),
    /// The feature is always absent.
    Off(u32),
}

impl Condition {
    #[inline]
    fn feature(self) -> Option<u32> {
        match self {
            Condition::None => None,
            Condition::On(f) | Condition::Off(f) => Some(f),
        }
    }
}

/// Path buffer length needed for a tree of the given depth.
///
/// Each recursion level keeps its own copy of the path, at most
/// `depth + 2` entries long.
pub(crate) fn path_buffer_len(max_depth: usize) -> usize {
    let d = max_depth + 2;
    d * (d + 1) / 2
}

fn extend_path(path: &mut [PathElement], depth: usize, zero_fraction: f64, one_fraction: f64, feature: Option<u32>) {
    path[depth] = PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    };
    let len = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / len;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / len;
    }
}

fn unwind_path(path: &mut [PathElement], depth: usize, path_index: usize) {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let len = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * len / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (depth - i) as f64 / len;
        } else {
            path[i].pweight = path[i].pweight * len / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in path_index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
}

/// Total permutation weight of the path with `path_index` removed.
fn unwound_path_sum(path: &[PathElement], depth: usize, path_index: usize) -> f64 {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let len = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    if one_fraction != 0.0 {
        for i in (0..depth).rev() {
            let tmp = next_one_portion / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - i) as f64;
        }
    } else {
        for i in (0..depth).rev() {
            total += path[i].pweight / (zero_fraction * (depth - i) as f64);
        }
    }
    total * len
}

struct Recursion<'a, L: LeafValue> {
    tree: &'a Tree<L>,
    covers: &'a [f32],
    sample: &'a [f32],
    condition: Condition,
    phi: &'a mut [f64],
    stride: usize,
}

impl<L: LeafValue> Recursion<'_, L> {
    /// Visit `node`, whose own path copy is `path[..=depth]` once extended
    /// with `incoming`.
    fn visit(
        &mut self,
        node: NodeId,
        path: &mut [PathElement],
        depth: usize,
        incoming: PathElement,
        condition_fraction: f64,
    ) -> Result<(), UnroutableCategory> {
        if condition_fraction == 0.0 {
            return Ok(());
        }

        // A conditioned feature is not part of the coalition being permuted.
        if incoming.feature.is_none() || incoming.feature != self.condition.feature() {
            extend_path(path, depth, incoming.zero_fraction, incoming.one_fraction, incoming.feature);
        }

        let tree = self.tree;
        if tree.is_leaf(node) {
            let values = tree.leaf_value(node).values();
            for i in 1..=depth {
                let element = path[i];
                let Some(feature) = element.feature else {
                    continue;
                };
                let weight = unwound_path_sum(path, depth, i);
                let scale = weight * (element.one_fraction - element.zero_fraction) * condition_fraction;
                for (k, &v) in values.iter().enumerate() {
                    self.phi[k * self.stride + feature as usize] += scale * f64::from(v);
                }
            }
            return Ok(());
        }

        let split = tree.split_index(node);
        let direction = tree.decide(node, self.sample.feature(split as usize))?;
        let hot = tree.child(node, direction);
        let cold = tree.child(node, direction.flip());

        let cover = f64::from(self.covers[node as usize]);
        let (hot_zero_fraction, cold_zero_fraction) = if cover > 0.0 {
            (
                f64::from(self.covers[hot as usize]) / cover,
                f64::from(self.covers[cold as usize]) / cover,
            )
        } else {
            (0.0, 0.0)
        };

        // Undo an earlier split on the same feature so it can be redone here.
        let mut incoming_zero_fraction = 1.0;
        let mut incoming_one_fraction = 1.0;
        let mut depth = depth;
        if let Some(index) = (1..=depth).find(|&i| path[i].feature == Some(split)) {
            incoming_zero_fraction = path[index].zero_fraction;
            incoming_one_fraction = path[index].one_fraction;
            unwind_path(path, depth, index);
            depth -= 1;
        }

        let mut hot_condition_fraction = condition_fraction;
        let mut cold_condition_fraction = condition_fraction;
        let mut child_depth = depth + 1;
        match self.condition {
            Condition::On(f) if f == split => {
                cold_condition_fraction = 0.0;
                child_depth -= 1;
            }
            Condition::Off(f) if f == split => {
                hot_condition_fraction *= hot_zero_fraction;
                cold_condition_fraction *= cold_zero_fraction;
                child_depth -= 1;
            }
            _ => {}
        }
        let conditioned = child_depth == depth;

        let branches = [
            (hot, hot_zero_fraction * incoming_zero_fraction, incoming_one_fraction, hot_condition_fraction),
            (cold, cold_zero_fraction * incoming_zero_fraction, 0.0, cold_condition_fraction),
        ];
        for (child, zero_fraction, one_fraction, fraction) in branches {
            // No coalition reaches a branch with both fractions zero.
            if !conditioned && zero_fraction == 0.0 && one_fraction == 0.0 {
                continue;
            }
            let (parent, rest) = path.split_at_mut(child_depth + 1);
            rest[..=child_depth].copy_from_slice(parent);
            self.visit(
                child,
                rest,
                child_depth,
                PathElement {
                    feature: Some(split),
                    zero_fraction,
                    one_fraction,
                    pweight: 0.0,
                },
                fraction,
            )?;
        }
        Ok(())
    }
}

/// Exact Tree SHAP values of one tree for one sample.
///
/// `means` are the tree's node mean values (`n_nodes x leaf_width`); the
/// root mean goes to the bias slot when unconditioned. `path` must hold at
/// least [`path_buffer_len`] elements for the tree's depth.
pub(crate) fn tree_shap<L: LeafValue>(
    tree: &Tree<L>,
    means: &[f64],
    sample: &[f32],
    path: &mut [PathElement],
    condition: Condition,
    phi: &mut [f64],
    stride: usize,
) -> Result<(), UnroutableCategory> {
    let width = tree.leaf_width();
    if condition == Condition::None {
        for k in 0..width {
            phi[k * stride + stride - 1] += means[k];
        }
    }
    if !tree.has_splits() {
        return Ok(());
    }

    let covers = tree.covers().unwrap_or(&[]);
    let mut recursion = Recursion {
        tree,
        covers,
        sample,
        condition,
        phi,
        stride,
    };
    let root = PathElement {
        feature: None,
        zero_fraction: 1.0,
        one_fraction: 1.0,
        pweight: 0.0,
    };
    recursion.visit(0, path, 0, root, 1.0)
}

/// Saabas-style attributions: walk the sample's own path and credit each
/// split feature with the change in expected value.
pub(crate) fn approximate_shap<L: LeafValue>(
    tree: &Tree<L>,
    means: &[f64],
    sample: &[f32],
    phi: &mut [f64],
    stride: usize,
) -> Result<(), UnroutableCategory> {
    let width = tree.leaf_width();
    let bias = stride - 1;
    for k in 0..width {
        phi[k * stride + bias] += means[k];
    }
    if !tree.has_splits() {
        return Ok(());
    }

    let mut node: NodeId = 0;
    let mut split = 0usize;
    while !tree.is_leaf(node) {
        split = tree.split_index(node) as usize;
        let next = tree.child(node, tree.decide(node, sample.feature(split))?);
        let (from, to) = (node as usize * width, next as usize * width);
        for k in 0..width {
            phi[k * stride + split] += means[to + k] - means[from + k];
        }
        node = next;
    }

    let leaf = tree.leaf_value(node).values();
    let at = node as usize * width;
    for k in 0..width {
        phi[k * stride + split] += f64::from(leaf[k]) - means[at + k];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::gbdt::ScalarLeaf;
    use approx::assert_abs_diff_eq;

    fn stump() -> Tree<ScalarLeaf> {
        crate::scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => leaf(-1.0),
            2 => leaf(1.0),
        }
        .with_covers(vec![100.0, 25.0, 75.0])
    }

    fn two_feature_tree() -> Tree<ScalarLeaf> {
        crate::scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => num(1, 0.5, L) -> 3, 4,
            2 => num(1, 0.5, L) -> 5, 6,
            3 => leaf(1.0),
            4 => leaf(2.0),
            5 => leaf(3.0),
            6 => leaf(4.0),
        }
        .with_covers(vec![8.0, 4.0, 4.0, 2.0, 2.0, 2.0, 2.0])
    }

    fn exact(tree: &Tree<ScalarLeaf>, sample: &[f32], condition: Condition, n_features: usize) -> Vec<f64> {
        let means = tree.node_mean_values().unwrap();
        let mut path = vec![PathElement::default(); path_buffer_len(tree.max_depth())];
        let mut phi = vec![0.0; n_features + 1];
        tree_shap(tree, &means, sample, &mut path, condition, &mut phi, n_features + 1).unwrap();
        phi
    }

    #[test]
    fn stump_attributes_everything_to_its_feature() {
        let tree = stump();
        // E[f] = 0.25 * -1 + 0.75 * 1 = 0.5
        let phi = exact(&tree, &[0.2], Condition::None, 1);
        assert_abs_diff_eq!(phi[1], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(phi[0], -1.5, epsilon = 1e-12);

        let phi = exact(&tree, &[0.9], Condition::None, 1);
        assert_abs_diff_eq!(phi[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn additive_tree_splits_credit_per_feature() {
        // f(x) = 1 + 2*[x0 >= 0.5] + [x1 >= 0.5] with balanced covers.
        let tree = two_feature_tree();
        let phi = exact(&tree, &[0.9, 0.9], Condition::None, 2);
        assert_abs_diff_eq!(phi[2], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(phi[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(phi[1], 0.5, epsilon = 1e-12);

        let phi = exact(&tree, &[0.1, 0.9], Condition::None, 2);
        assert_abs_diff_eq!(phi[0], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(phi[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn repeated_feature_is_unwound() {
        let tree = crate::scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => num(0, 0.25, L) -> 3, 4,
            2 => leaf(4.0),
            3 => leaf(1.0),
            4 => leaf(2.0),
        }
        .with_covers(vec![4.0, 2.0, 2.0, 1.0, 1.0]);
        let means = tree.node_mean_values().unwrap();
        for x in [0.1f32, 0.3, 0.7] {
            let phi = exact(&tree, &[x], Condition::None, 1);
            let prediction = tree.leaf_value(tree.traverse_to_leaf(&[x][..]).unwrap()).0;
            // A single feature takes the whole difference.
            assert_abs_diff_eq!(phi[0], f64::from(prediction) - means[0], epsilon = 1e-12);
        }
    }

    #[test]
    fn conditioning_on_and_off() {
        let tree = two_feature_tree();
        let sample = [0.9f32, 0.9];
        let on = exact(&tree, &sample, Condition::On(0), 2);
        let off = exact(&tree, &sample, Condition::Off(0), 2);
        // Additive tree: feature 1's credit does not depend on feature 0.
        assert_abs_diff_eq!(on[1], off[1], epsilon = 1e-12);
        assert_abs_diff_eq!(on[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(off[0], 0.0, epsilon = 1e-12);
        assert_eq!(on[2], 0.0);
    }

    #[test]
    fn approximate_follows_the_sample_path() {
        let tree = two_feature_tree();
        let means = tree.node_mean_values().unwrap();
        let mut phi = vec![0.0; 3];
        approximate_shap(&tree, &means, &[0.9, 0.1], &mut phi, 3).unwrap();
        // bias 2.5, root -> node 2 (mean 3.5), node 2 -> leaf 5 (3.0)
        assert_eq!(phi, vec![1.0, -0.5, 2.5]);
    }

    #[test]
    fn path_buffer_fits_deep_trees() {
        // Left-leaning chain of depth 4.
        let tree = crate::scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => num(1, 0.5, L) -> 3, 4,
            2 => leaf(0.0),
            3 => num(2, 0.5, L) -> 5, 6,
            4 => leaf(1.0),
            5 => num(0, 0.25, L) -> 7, 8,
            6 => leaf(2.0),
            7 => leaf(3.0),
            8 => leaf(4.0),
        }
        .with_covers(vec![16.0, 8.0, 8.0, 4.0, 4.0, 2.0, 2.0, 1.0, 1.0]);
        let means = tree.node_mean_values().unwrap();
        let sample = [0.1f32, 0.1, 0.1];
        let phi = exact(&tree, &sample, Condition::None, 3);
        let total: f64 = phi.iter().sum();
        assert_abs_diff_eq!(total, 3.0, epsilon = 1e-10);
        assert_abs_diff_eq!(phi[3], means[0], epsilon = 1e-12);
    }
}
