//! Tree SHAP contributions and interactions through the public predictor.

use approx::assert_abs_diff_eq;
use ndarray::array;
use proptest::prelude::*;
use treeinfer::testing::{random_dense, random_mixed, RandomForest};
use treeinfer::{scalar_tree, Dataset, Forest, PredictError, Predictor, ScalarLeaf, Tree, TreeRange};

// =============================================================================
// Test Helpers
// =============================================================================

/// `1 + 2 * [x0 >= 0.5] + [x1 >= 0.5]` with uniform covers.
fn additive_forest() -> Forest<ScalarLeaf> {
    let tree = scalar_tree! {
        0 => num(0, 0.5, L) -> 1, 2,
        1 => num(1, 0.5, L) -> 3, 4,
        2 => num(1, 0.5, L) -> 5, 6,
        3 => leaf(1.0),
        4 => leaf(2.0),
        5 => leaf(3.0),
        6 => leaf(4.0),
    }
    .with_covers(vec![4.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0]);

    let mut forest = Forest::for_regression().with_base_score(vec![0.5]);
    forest.push_tree(tree, 0);
    forest
}

// =============================================================================
// Contributions
// =============================================================================

#[test]
fn additive_tree_contributions() {
    let forest = additive_forest();
    let predictor = Predictor::new(&forest).unwrap();
    let data = Dataset::from_dense(array![[0.1f32, 0.9], [0.9, f32::NAN]]);

    for approximate in [false, true] {
        let shap = predictor.predict_contributions(&data, TreeRange::all(), approximate).unwrap();
        assert_eq!(shap.n_features(), 2);

        assert_abs_diff_eq!(shap.get(0, 0, 0), -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shap.get(0, 1, 0), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(shap.base_value(0, 0), 3.0, epsilon = 1e-9);

        // NaN goes left at node 2.
        assert_abs_diff_eq!(shap.get(1, 0, 0), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shap.get(1, 1, 0), -0.5, epsilon = 1e-9);
    }
}

#[test]
fn additive_tree_has_no_interactions() {
    let forest = additive_forest();
    let predictor = Predictor::new(&forest).unwrap();
    let data = Dataset::from_dense(array![[0.1f32, 0.9]]);

    let interactions = predictor.predict_interactions(&data, TreeRange::all(), false).unwrap();
    assert_abs_diff_eq!(interactions.get(0, 0, 0, 0), -1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(interactions.get(0, 0, 1, 1), 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(interactions.get(0, 0, 0, 1), 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(interactions.get(0, 0, 1, 0), 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(interactions.get(0, 0, 2, 2), 3.0, epsilon = 1e-9);
}

#[test]
fn bias_includes_base_margin() {
    let forest = additive_forest();
    let predictor = Predictor::new(&forest).unwrap();
    let data = Dataset::from_dense(array![[0.1f32, 0.9]]).with_base_margin(array![[10.0f32]]);

    let shap = predictor.predict_contributions(&data, TreeRange::all(), false).unwrap();
    assert_abs_diff_eq!(shap.base_value(0, 0), 12.5, epsilon = 1e-9);
    assert!(shap.verify(&[12.0], 1e-6));
}

#[test]
fn trees_without_covers_rejected() {
    let mut forest = Forest::for_regression().with_base_score(vec![0.0]);
    forest.push_tree(Tree::leaf(ScalarLeaf(0.5)), 0);
    forest.push_tree(
        scalar_tree! {
            0 => num(0, 0.5, L) -> 1, 2,
            1 => leaf(1.0),
            2 => leaf(2.0),
        },
        0,
    );
    let predictor = Predictor::new(&forest).unwrap();
    let data = Dataset::from_dense(array![[0.1f32]]);

    assert_eq!(
        predictor.predict_contributions(&data, TreeRange::all(), false).unwrap_err(),
        PredictError::MissingCovers { tree_idx: 1 }
    );
    // Only the explained trees need covers.
    assert!(predictor.predict_contributions(&data, TreeRange::new(0, 1), false).is_ok());
}

#[test]
fn range_contributions_sum_to_range_margins() {
    let forest = RandomForest::builder().n_rounds(6).n_groups(2).build().scalar(301);
    let predictor = Predictor::new(&forest).unwrap();
    let data = Dataset::from_dense(random_dense(20, 5, 0.1, 302));
    let range = forest.round_range(2, 5).unwrap();

    let margins = predictor.predict_batch(&data, range).unwrap();
    let shap = predictor.predict_contributions(&data, range, false).unwrap();
    assert!(shap.verify(margins.as_slice(), 1e-4));
}

#[test]
fn vector_leaf_contributions() {
    let forest = RandomForest::builder().n_rounds(5).n_groups(3).build().vector(311);
    let predictor = Predictor::new(&forest).unwrap();
    let data = Dataset::from_dense(random_dense(15, 5, 0.1, 312));

    let margins = predictor.predict_batch(&data, TreeRange::all()).unwrap();
    for approximate in [false, true] {
        let shap = predictor.predict_contributions(&data, TreeRange::all(), approximate).unwrap();
        assert_eq!(shap.n_outputs(), 3);
        assert!(shap.verify(margins.as_slice(), 1e-4));
    }
}

// =============================================================================
// Interactions
// =============================================================================

#[test]
fn interactions_consistent_with_contributions() {
    let forest = RandomForest::builder()
        .n_rounds(5)
        .n_groups(2)
        .max_depth(5)
        .n_categorical(1)
        .weighted(true)
        .build()
        .scalar(321);
    let predictor = Predictor::new(&forest).unwrap();
    let data = Dataset::from_dense(random_mixed(10, 5, 1, 4, 0.1, 322));

    let contributions = predictor.predict_contributions(&data, TreeRange::all(), false).unwrap();
    let interactions = predictor.predict_interactions(&data, TreeRange::all(), false).unwrap();
    let side = contributions.n_features() + 1;

    let collapsed = interactions.to_contributions();
    for (a, b) in collapsed.values().iter().zip(contributions.values()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
    for sample in 0..10 {
        for output in 0..2 {
            for i in 0..side {
                for j in 0..side {
                    assert_abs_diff_eq!(
                        interactions.get(sample, output, i, j),
                        interactions.get(sample, output, j, i),
                        epsilon = 1e-5
                    );
                }
            }
        }
    }
}

#[test]
fn approximate_interactions_are_diagonal() {
    let forest = RandomForest::builder().n_rounds(3).build().scalar(331);
    let predictor = Predictor::new(&forest).unwrap();
    let data = Dataset::from_dense(random_dense(5, 5, 0.0, 332));

    let contributions = predictor.predict_contributions(&data, TreeRange::all(), true).unwrap();
    let interactions = predictor.predict_interactions(&data, TreeRange::all(), true).unwrap();
    let side = contributions.n_features() + 1;
    for sample in 0..5 {
        for i in 0..side {
            for j in 0..side {
                let expected = if i == j { contributions.row(sample, 0)[i] } else { 0.0 };
                assert_abs_diff_eq!(interactions.get(sample, 0, i, j), expected, epsilon = 1e-9);
            }
        }
    }
}

// =============================================================================
// Local Accuracy
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn contributions_sum_to_margins(
        forest_seed in any::<u64>(),
        data_seed in any::<u64>(),
        n_groups in 1u32..4,
        max_depth in 1usize..7,
        weighted in any::<bool>(),
        approximate in any::<bool>(),
    ) {
        let forest = RandomForest::builder()
            .n_rounds(4)
            .n_groups(n_groups)
            .max_depth(max_depth)
            .n_categorical(1)
            .weighted(weighted)
            .build()
            .scalar(forest_seed);
        let predictor = Predictor::new(&forest).unwrap();
        let data = Dataset::from_dense(random_mixed(16, 5, 1, 4, 0.2, data_seed));

        let margins = predictor.predict_batch(&data, TreeRange::all()).unwrap();
        let shap = predictor.predict_contributions(&data, TreeRange::all(), approximate).unwrap();
        prop_assert!(shap.verify(margins.as_slice(), 1e-4));
    }
}
