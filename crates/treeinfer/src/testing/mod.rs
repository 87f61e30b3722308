//! Seeded generators and helpers shared by unit tests, integration tests
//! and benchmarks.
//!
//! - [`random_dense`] / [`random_mixed`]: feature matrices with missing values
//! - [`RandomForest`]: random forests with consistent covers
//! - [`run_with_communicators`]: run a closure once per column-split worker

use bon::Builder;
use ndarray::Array2;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::collective::InMemoryCommunicator;
use crate::repr::gbdt::{Forest, LeafValue, ScalarLeaf, Tree, TreeBuilder, VectorLeaf};

// =============================================================================
// Data
// =============================================================================

/// Uniform `[0, 1)` features; each entry is `NaN` with probability `missing_rate`.
pub fn random_dense(rows: usize, cols: usize, missing_rate: f64, seed: u64) -> Array2<f32> {
    random_mixed(rows, cols, 0, 0, missing_rate, seed)
}

/// Like [`random_dense`], but the first `n_categorical` columns hold integer
/// categories in `[0, n_categories)`.
pub fn random_mixed(
    rows: usize,
    cols: usize,
    n_categorical: usize,
    n_categories: u32,
    missing_rate: f64,
    seed: u64,
) -> Array2<f32> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |(_, col)| {
        if missing_rate > 0.0 && rng.gen_bool(missing_rate) {
            f32::NAN
        } else if col < n_categorical {
            rng.gen_range(0..n_categories.max(1)) as f32
        } else {
            rng.gen::<f32>()
        }
    })
}

// =============================================================================
// Forests
// =============================================================================

/// Shape of a randomly generated forest.
///
/// ```
/// use treeinfer::testing::RandomForest;
///
/// let forest = RandomForest::builder().n_rounds(3).n_groups(2).build().scalar(7);
/// assert_eq!(forest.n_trees(), 6);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct RandomForest {
    #[builder(default = 10)]
    pub n_rounds: usize,
    #[builder(default = 1)]
    pub n_groups: u32,
    #[builder(default = 4)]
    pub max_depth: usize,
    #[builder(default = 5)]
    pub n_features: usize,
    /// The first `n_categorical` features are split categorically.
    #[builder(default = 0)]
    pub n_categorical: usize,
    #[builder(default = 4)]
    pub n_categories: u32,
    /// Draw a random weight in `[0.5, 1.5)` for every tree.
    #[builder(default = false)]
    pub weighted: bool,
    /// Probability that a node above `max_depth` still becomes a leaf.
    #[builder(default = 0.2)]
    pub leaf_probability: f64,
}

impl RandomForest {
    /// Forest with one scalar-leaf tree per group and round.
    pub fn scalar(&self, seed: u64) -> Forest<ScalarLeaf> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let base_score = (0..self.n_groups).map(|_| rng.gen_range(-0.5..0.5)).collect();
        let mut forest = Forest::new(self.n_groups)
            .with_base_score(base_score)
            .with_n_features(self.n_features);

        for _ in 0..self.n_rounds {
            for group in 0..self.n_groups {
                let tree = self.tree(&mut rng, |rng| ScalarLeaf(rng.gen_range(-1.0..1.0)));
                self.push(&mut forest, tree, group, &mut rng);
            }
        }
        forest
    }

    /// Forest with one vector-leaf tree per round, leaves `n_groups` wide.
    pub fn vector(&self, seed: u64) -> Forest<VectorLeaf> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let width = self.n_groups as usize;
        let base_score = (0..self.n_groups).map(|_| rng.gen_range(-0.5..0.5)).collect();
        let mut forest = Forest::new(self.n_groups)
            .with_base_score(base_score)
            .with_n_features(self.n_features);

        for _ in 0..self.n_rounds {
            let tree = self.tree(&mut rng, |rng| {
                VectorLeaf::new((0..width).map(|_| rng.gen_range(-1.0..1.0)).collect())
            });
            self.push(&mut forest, tree, 0, &mut rng);
        }
        forest
    }

    fn push<L: LeafValue>(&self, forest: &mut Forest<L>, tree: Tree<L>, group: u32, rng: &mut Xoshiro256PlusPlus) {
        if self.weighted {
            forest.push_weighted_tree(tree, group, rng.gen_range(0.5..1.5));
        } else {
            forest.push_tree(tree, group);
        }
    }

    fn tree<L, F>(&self, rng: &mut Xoshiro256PlusPlus, mut leaf: F) -> Tree<L>
    where
        L: LeafValue + Default,
        F: FnMut(&mut Xoshiro256PlusPlus) -> L,
    {
        let mut builder = TreeBuilder::<L>::new();
        let mut covers = vec![rng.gen_range(50.0f32..150.0)];
        // (node, depth) in allocation order
        let mut queue = std::collections::VecDeque::from([(0u32, 0usize)]);
        let mut next_id = 1u32;

        while let Some((node, depth)) = queue.pop_front() {
            let split = depth < self.max_depth
                && self.n_features > 0
                && (depth == 0 || !rng.gen_bool(self.leaf_probability));
            if !split {
                builder.leaf(node, leaf(rng));
                continue;
            }

            let (left, right) = (next_id, next_id + 1);
            next_id += 2;
            let cover = covers[node as usize];
            let share = rng.gen_range(0.1f32..0.9);
            covers.push(cover * share);
            covers.push(cover - cover * share);

            let feature = rng.gen_range(0..self.n_features);
            let default_left = rng.gen_bool(0.5);
            if feature < self.n_categorical {
                let (left_cats, right_cats): (Vec<u32>, Vec<u32>) =
                    (0..self.n_categories).partition(|_| rng.gen_bool(0.5));
                builder.categorical(node, feature as u32, &left_cats, &right_cats, default_left, left, right);
            } else {
                builder.numeric(node, feature as u32, rng.gen::<f32>(), default_left, left, right);
            }
            queue.push_back((left, depth + 1));
            queue.push_back((right, depth + 1));
        }

        builder.covers(covers);
        builder.build().expect("generated trees are valid")
    }
}

// =============================================================================
// Collective
// =============================================================================

/// Run `f` on `world_size` threads, one per in-memory communicator rank,
/// and collect the results in rank order.
pub fn run_with_communicators<T, F>(world_size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(InMemoryCommunicator) -> T + Sync,
{
    let comms = InMemoryCommunicator::group(world_size);
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker thread panicked"))
            .collect()
    })
}
