//! Prediction entry points for tree ensembles.
//!
//! [`Predictor`] wraps a validated [`Forest`] and runs every prediction mode
//! through the same row-block driver:
//!
//! - [`Predictor::predict_batch`]: raw margins for a [`RowSource`]
//! - [`Predictor::predict_instance`]: margins of one dense row
//! - [`Predictor::predict_leaf`]: leaf index per row and tree
//! - [`Predictor::inplace_predict`]: margins over borrowed caller buffers
//! - [`Predictor::predict_contributions`] / [`Predictor::predict_interactions`]: SHAP
//! - [`Predictor::update_prediction_cache`]: incremental margins during training
//!
//! # Usage
//!
//! ```
//! use treeinfer::{Dataset, Forest, Predictor, TreeRange};
//! use ndarray::array;
//!
//! let mut forest = Forest::for_regression().with_base_score(vec![0.5]);
//! forest.push_tree(
//!     treeinfer::scalar_tree! {
//!         0 => num(0, 0.5, L) -> 1, 2,
//!         1 => leaf(1.0),
//!         2 => leaf(2.0),
//!     },
//!     0,
//! );
//!
//! let predictor = Predictor::new(&forest).unwrap();
//! let data = Dataset::from_dense(array![[0.3f32], [0.7]]);
//! let output = predictor.predict_batch(&data, TreeRange::all()).unwrap();
//! assert_eq!(output.as_slice(), &[1.5, 2.5]);
//! ```
//!
//! # Column split
//!
//! When a dataset reports [`DataSplit::Column`], margins and leaf indices are
//! computed cooperatively over the predictor's [`Communicator`]; every worker
//! must make the same calls in the same order. SHAP values are rejected for
//! such datasets.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::collective::{Communicator, LocalCommunicator};
use crate::data::{DataSplit, DatasetInfo, InplaceData, RowSource, SamplesView};
use crate::error::PredictError;
use crate::explainability::shap::{ContributionVisitor, InteractionVisitor, ShapInteractions, ShapValues};
use crate::repr::gbdt::{Forest, LeafValue, ScalarLeaf, TreeRange};
use crate::utils::{run_with_threads, Parallelism};

use super::cache::PredictionCacheEntry;
use super::column_split::visit_rows_column_split;
use super::config::PredictorConfig;
use super::output::{LeafIndices, PredictionOutput};
use super::traversal::{visit_rows, BlockPlan, LeafIndexVisitor, LeafSink, LeafWalk, MarginInit, ScoreVisitor, TreeVisitor};

/// Tree ensemble predictor.
///
/// Cheap to construct; holds a reference to the forest, the configuration
/// and the communicator used for column-split data.
#[derive(Clone)]
pub struct Predictor<'f, L: LeafValue = ScalarLeaf> {
    forest: &'f Forest<L>,
    config: PredictorConfig,
    communicator: Arc<dyn Communicator>,
}

impl<L: LeafValue> fmt::Debug for Predictor<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predictor")
            .field("n_trees", &self.forest.n_trees())
            .field("n_groups", &self.forest.n_groups())
            .field("config", &self.config)
            .field("communicator", &self.communicator)
            .finish()
    }
}

impl<'f, L: LeafValue> Predictor<'f, L> {
    /// Create a predictor after validating the forest.
    pub fn new(forest: &'f Forest<L>) -> Result<Self, PredictError> {
        forest.validate()?;
        log::debug!(
            "predictor over {} trees, {} groups, {} features{}",
            forest.n_trees(),
            forest.n_groups(),
            forest.n_features(),
            if forest.is_vector_leaf() { " (vector leaves)" } else { "" },
        );

        Ok(Self {
            forest,
            config: PredictorConfig::default(),
            communicator: Arc::new(LocalCommunicator),
        })
    }

    pub fn with_config(mut self, config: PredictorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `communicator` for column-split datasets.
    pub fn with_communicator(mut self, communicator: impl Communicator + 'static) -> Self {
        self.communicator = Arc::new(communicator);
        self
    }

    #[inline]
    pub fn forest(&self) -> &Forest<L> {
        self.forest
    }

    #[inline]
    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Number of output groups.
    #[inline]
    pub fn n_groups(&self) -> usize {
        self.forest.n_groups() as usize
    }

    // =========================================================================
    // Scores
    // =========================================================================

    /// Raw margins of every row for the trees in `range`.
    ///
    /// Rows start from the dataset's base margin if it has one, otherwise from
    /// the forest's base score. `range.end == 0` means every tree.
    pub fn predict_batch<D: RowSource + ?Sized>(
        &self,
        data: &D,
        range: TreeRange,
    ) -> Result<PredictionOutput, PredictError> {
        let range = self.forest.tree_range(range.begin, range.end)?;
        let info = data.info();
        let mut output = PredictionOutput::zeros(info.n_rows, self.n_groups());

        self.with_parallelism(|parallelism| {
            let init = self.margin_init(info)?;
            self.score_into(data, range, init, output.as_mut_slice(), parallelism)
        })?;
        Ok(output)
    }

    /// Margins of a single dense row (missing values as `NaN`).
    ///
    /// With a multi-worker communicator the row is treated as this worker's
    /// share of a column-split row.
    pub fn predict_instance(&self, row: &[f32], range: TreeRange) -> Result<Vec<f32>, PredictError> {
        let range = self.forest.tree_range(range.begin, range.end)?;
        self.check_features(row.len())?;

        let comm = &self.communicator;
        if comm.world_size() > 1 {
            let data = InplaceData::dense(SamplesView::from_slice(row, 1, row.len())?).with_data_split(
                DataSplit::Column {
                    rank: comm.rank(),
                    world_size: comm.world_size(),
                },
            );
            return self.predict_batch(&data, range).map(PredictionOutput::into_vec);
        }

        let visitor = ScoreVisitor::new(self.forest, MarginInit::BaseScore);
        let walk = LeafWalk(&visitor);
        let mut output = vec![0.0; self.n_groups()];
        walk.init_row(0, output.as_mut_slice());
        for tree_idx in range {
            walk.visit_tree(tree_idx, row, &mut (), output.as_mut_slice())?;
        }
        Ok(output)
    }

    /// Margins over borrowed caller buffers.
    ///
    /// Dense rows without a missing sentinel are read in place; CSR rows and
    /// sentinel rows are expanded one at a time into a per-thread buffer.
    pub fn inplace_predict(&self, data: &InplaceData<'_>, range: TreeRange) -> Result<PredictionOutput, PredictError> {
        self.predict_batch(data, range)
    }

    /// Leaf index reached by every row in every tree of `range`.
    pub fn predict_leaf<D: RowSource + ?Sized>(&self, data: &D, range: TreeRange) -> Result<LeafIndices, PredictError> {
        let range = self.forest.tree_range(range.begin, range.end)?;
        let info = data.info();
        let mut output = LeafIndices::zeros(info.n_rows, range.len());

        self.with_parallelism(|parallelism| {
            let plan = self.plan(info, range, parallelism)?;
            let visitor = LeafIndexVisitor::new(self.forest, range);
            self.visit_leaves(data, &visitor, plan, output.as_mut_slice())
        })?;
        Ok(output)
    }

    // =========================================================================
    // SHAP
    // =========================================================================

    /// Per-feature contributions; the bias slot holds the expected value
    /// plus the row's initial margin.
    ///
    /// Exact mode runs Tree SHAP; approximate mode credits each split on the
    /// row's path with the change in expected value.
    pub fn predict_contributions<D: RowSource + ?Sized>(
        &self,
        data: &D,
        range: TreeRange,
        approximate: bool,
    ) -> Result<ShapValues, PredictError> {
        let range = self.explained_range(data, range, "predict_contributions")?;
        let info = data.info();

        self.with_parallelism(|parallelism| {
            let plan = self.plan(info, range, parallelism)?;
            let visitor = ContributionVisitor::new(self.forest, range, self.margin_init(info)?, approximate)?;
            let mut values = vec![0.0; info.n_rows * visitor.stride()];
            visit_rows(data, &visitor, plan, &mut values)?;
            Ok(ShapValues::from_vec(values, info.n_rows, visitor.n_features(), self.n_groups()))
        })
    }

    /// SHAP interaction values; each matrix row sums to the matching
    /// contribution of [`predict_contributions`](Self::predict_contributions).
    pub fn predict_interactions<D: RowSource + ?Sized>(
        &self,
        data: &D,
        range: TreeRange,
        approximate: bool,
    ) -> Result<ShapInteractions, PredictError> {
        let range = self.explained_range(data, range, "predict_interactions")?;
        let info = data.info();

        self.with_parallelism(|parallelism| {
            let plan = self.plan(info, range, parallelism)?;
            let visitor = InteractionVisitor::new(self.forest, range, self.margin_init(info)?, approximate)?;
            let mut values = vec![0.0; info.n_rows * visitor.stride()];
            visit_rows(data, &visitor, plan, &mut values)?;
            Ok(ShapInteractions::from_vec(values, info.n_rows, visitor.n_features(), self.n_groups()))
        })
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Bring `entry` up to date with every tree of the forest.
    ///
    /// An entry already at the forest size is left alone. An entry for the
    /// same dataset with fewer trees gets only the missing trees added to its
    /// margins. Anything else (another dataset, a larger version, a different
    /// shape) is recomputed from scratch. On error the entry is reset.
    pub fn update_prediction_cache<D: RowSource + ?Sized>(
        &self,
        data: &D,
        entry: &mut PredictionCacheEntry,
    ) -> Result<(), PredictError> {
        let result = self.with_parallelism(|parallelism| self.update_entry(data, entry, parallelism));
        if let Err(err) = &result {
            log::warn!("prediction cache update failed, resetting entry: {err}");
            entry.reset();
        }
        result
    }

    fn update_entry<D: RowSource + ?Sized>(
        &self,
        data: &D,
        entry: &mut PredictionCacheEntry,
        parallelism: Parallelism,
    ) -> Result<(), PredictError> {
        let n_trees = self.forest.n_trees();
        let info = data.info();
        let shape = (info.n_rows, self.n_groups());

        let (range, init) = if entry.extends(data.id(), n_trees, shape) {
            if entry.version == n_trees {
                log::trace!("prediction cache hit at version {n_trees}");
                return Ok(());
            }
            log::debug!("prediction cache: adding trees {}..{n_trees}", entry.version);
            (TreeRange::new(entry.version, n_trees), MarginInit::Keep)
        } else {
            log::debug!(
                "prediction cache: recomputing {} rows (version {}, {n_trees} trees)",
                info.n_rows,
                entry.version
            );
            entry.predictions = PredictionOutput::zeros(info.n_rows, self.n_groups());
            (TreeRange::new(0, n_trees), self.margin_init(info)?)
        };

        self.score_into(data, range, init, entry.predictions.as_mut_slice(), parallelism)?;
        entry.version = n_trees;
        entry.dataset = Some(data.id());
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn with_parallelism<T: Send>(&self, f: impl FnOnce(Parallelism) -> T + Send) -> T {
        run_with_threads(self.config.thread_count(), f)
    }

    fn check_features(&self, data_features: usize) -> Result<usize, PredictError> {
        let model = self.forest.n_features();
        if data_features > model {
            return Err(PredictError::FeatureCountMismatch {
                data: data_features,
                model,
            });
        }
        Ok(model)
    }

    fn plan(&self, info: &DatasetInfo, range: TreeRange, parallelism: Parallelism) -> Result<BlockPlan, PredictError> {
        let model_features = self.check_features(info.n_features)?;
        log::debug!(
            "{} rows x trees {}..{} in blocks of {} ({:?})",
            info.n_rows,
            range.begin,
            range.end,
            self.config.block_size,
            parallelism
        );
        Ok(BlockPlan {
            range,
            n_features: model_features.max(info.n_features),
            // Public fields bypass builder validation.
            block_size: self.config.block_size.max(1),
            parallelism,
        })
    }

    /// Initial margins: the dataset's base margin, else the base score.
    fn margin_init<'d>(&self, info: &'d DatasetInfo) -> Result<MarginInit<'d>, PredictError> {
        let Some(margin) = &info.base_margin else {
            return Ok(MarginInit::BaseScore);
        };
        if margin.dim() != (info.n_rows, self.n_groups()) {
            return Err(PredictError::BaseMarginShape {
                expected: info.n_rows * self.n_groups(),
                actual: margin.len(),
            });
        }
        Ok(MarginInit::PerRow(match margin.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(margin.iter().copied().collect()),
        }))
    }

    fn explained_range<D: RowSource + ?Sized>(
        &self,
        data: &D,
        range: TreeRange,
        operation: &'static str,
    ) -> Result<TreeRange, PredictError> {
        if data.info().data_split.is_column() {
            return Err(PredictError::ColumnSplitUnsupported { operation });
        }
        self.forest.tree_range(range.begin, range.end)
    }

    fn score_into<D: RowSource + ?Sized>(
        &self,
        data: &D,
        range: TreeRange,
        init: MarginInit<'_>,
        output: &mut [f32],
        parallelism: Parallelism,
    ) -> Result<(), PredictError> {
        let plan = self.plan(data.info(), range, parallelism)?;
        let visitor = ScoreVisitor::new(self.forest, init);
        self.visit_leaves(data, &visitor, plan, output)
    }

    /// Route to the column-split coordinator when the data asks for it.
    fn visit_leaves<V: LeafSink, D: RowSource + ?Sized>(
        &self,
        data: &D,
        visitor: &V,
        plan: BlockPlan,
        output: &mut [V::Out],
    ) -> Result<(), PredictError> {
        if data.info().data_split.is_column() {
            visit_rows_column_split(data, self.communicator.as_ref(), visitor, plan, output)
        } else {
            visit_rows(data, &LeafWalk(visitor), plan, output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use crate::repr::gbdt::Tree;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn build_simple_tree(left_val: f32, right_val: f32, threshold: f32) -> Tree<ScalarLeaf> {
        crate::scalar_tree! {
            0 => num(0, threshold, L) -> 1, 2,
            1 => leaf(left_val),
            2 => leaf(right_val),
        }
    }

    fn simple_forest() -> Forest<ScalarLeaf> {
        let mut forest = Forest::for_regression().with_base_score(vec![0.5]);
        forest.push_tree(build_simple_tree(1.0, 2.0, 0.5), 0);
        forest.push_tree(build_simple_tree(0.5, 1.5, 0.5), 0);
        forest
    }

    #[test]
    fn predict_instance_matches_batch() {
        let forest = simple_forest();
        let predictor = Predictor::new(&forest).unwrap();

        assert_eq!(predictor.predict_instance(&[0.3], TreeRange::all()).unwrap(), vec![2.0]);
        assert_eq!(predictor.predict_instance(&[0.7], TreeRange::new(0, 1)).unwrap(), vec![2.5]);

        let data = Dataset::from_dense(array![[0.3f32], [0.7]]);
        let output = predictor.predict_batch(&data, TreeRange::all()).unwrap();
        assert_eq!(output.as_slice(), &[2.0, 4.0]);
    }

    #[test]
    fn invalid_range_rejected() {
        let forest = simple_forest();
        let predictor = Predictor::new(&forest).unwrap();
        let err = predictor.predict_instance(&[0.3], TreeRange::new(1, 3)).unwrap_err();
        assert_eq!(
            err,
            PredictError::InvalidTreeRange {
                begin: 1,
                end: 3,
                n_trees: 2
            }
        );
    }

    #[test]
    fn too_many_features_rejected() {
        let forest = simple_forest();
        let predictor = Predictor::new(&forest).unwrap();
        let data = Dataset::from_dense(array![[0.3f32, 1.0]]);
        let err = predictor.predict_batch(&data, TreeRange::all()).unwrap_err();
        assert_eq!(err, PredictError::FeatureCountMismatch { data: 2, model: 1 });
    }

    #[test]
    fn base_margin_replaces_base_score() {
        let forest = simple_forest();
        let predictor = Predictor::new(&forest).unwrap();
        let data = Dataset::from_dense(array![[0.3f32], [0.7]]).with_base_margin(array![[10.0f32], [-10.0]]);
        let output = predictor.predict_batch(&data, TreeRange::all()).unwrap();
        assert_eq!(output.as_slice(), &[11.5, -6.5]);

        let bad = Dataset::from_dense(array![[0.3f32]]).with_base_margin(Array2::zeros((1, 2)));
        assert_eq!(
            predictor.predict_batch(&bad, TreeRange::all()).unwrap_err(),
            PredictError::BaseMarginShape { expected: 1, actual: 2 }
        );
    }

    #[test]
    fn leaf_indices_for_range() {
        let forest = simple_forest();
        let predictor = Predictor::new(&forest).unwrap();
        let data = Dataset::from_dense(array![[0.3f32], [0.7]]);

        let leaves = predictor.predict_leaf(&data, TreeRange::new(1, 2)).unwrap();
        assert_eq!(leaves.n_trees(), 1);
        assert_eq!(leaves.as_slice(), &[1, 2]);
    }

    #[test]
    fn cache_adds_only_new_trees() {
        let mut forest = Forest::for_regression().with_base_score(vec![0.5]);
        forest.push_tree(build_simple_tree(1.0, 2.0, 0.5), 0);
        let data = Dataset::from_dense(array![[0.3f32], [0.7]]);
        let mut entry = PredictionCacheEntry::new();

        Predictor::new(&forest).unwrap().update_prediction_cache(&data, &mut entry).unwrap();
        assert_eq!(entry.version(), 1);
        assert_eq!(entry.predictions().as_slice(), &[1.5, 2.5]);

        forest.push_tree(build_simple_tree(0.5, 1.5, 0.5), 0);
        let predictor = Predictor::new(&forest).unwrap();
        predictor.update_prediction_cache(&data, &mut entry).unwrap();
        assert_eq!(entry.version(), 2);
        assert_eq!(entry.predictions().as_slice(), &[2.0, 4.0]);

        // no-op at the current version
        predictor.update_prediction_cache(&data, &mut entry).unwrap();
        assert_eq!(entry.predictions().as_slice(), &[2.0, 4.0]);
    }

    #[test]
    fn contributions_reject_column_split() {
        let forest = simple_forest();
        let predictor = Predictor::new(&forest).unwrap();
        let data = Dataset::from_dense(array![[0.3f32]]).slice_columns(1, 0).unwrap();
        // A one-worker column split still takes the column-split path.
        assert_eq!(
            predictor.predict_contributions(&data, TreeRange::all(), false).unwrap_err(),
            PredictError::ColumnSplitUnsupported {
                operation: "predict_contributions"
            }
        );
        assert!(predictor.predict_batch(&data, TreeRange::all()).is_ok());
    }

    #[test]
    fn contributions_bias_for_leaf_only_forest() {
        let mut forest = Forest::for_regression().with_base_score(vec![0.5]).with_n_features(3);
        forest.push_tree(Tree::leaf(ScalarLeaf(1.0)), 0);
        let predictor = Predictor::new(&forest).unwrap();
        let data = Dataset::from_dense(array![[0.0f32, 1.0, 2.0]]);

        let shap = predictor.predict_contributions(&data, TreeRange::all(), false).unwrap();
        assert_eq!(shap.n_features(), 3);
        assert_abs_diff_eq!(shap.base_value(0, 0), 1.5);
        assert_eq!(shap.feature_shap(0, 0), &[0.0, 0.0, 0.0]);
    }
}
