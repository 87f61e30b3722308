//! Prediction cache for training-time datasets.
//!
//! The training loop keeps one entry per dataset it evaluates. After every
//! boosting round the entry is brought up to date by predicting only the
//! trees added since its last update; see
//! [`Predictor::update_prediction_cache`](super::Predictor::update_prediction_cache).

use std::collections::HashMap;

use crate::data::{DatasetId, RowSource};

use super::PredictionOutput;

/// Margins of one dataset for the first `version` trees of a forest.
#[derive(Debug, Clone, Default)]
pub struct PredictionCacheEntry {
    pub(crate) predictions: PredictionOutput,
    pub(crate) version: usize,
    pub(crate) dataset: Option<DatasetId>,
}

impl PredictionCacheEntry {
    /// An empty entry; the first update predicts every tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trees included in [`predictions`](Self::predictions).
    #[inline]
    pub fn version(&self) -> usize {
        self.version
    }

    #[inline]
    pub fn predictions(&self) -> &PredictionOutput {
        &self.predictions
    }

    /// The dataset the predictions belong to, once computed.
    #[inline]
    pub fn dataset(&self) -> Option<DatasetId> {
        self.dataset
    }

    /// Drop the cached margins; the next update recomputes from scratch.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether the cached margins can be extended for `dataset`.
    pub(crate) fn extends(&self, dataset: DatasetId, n_trees: usize, shape: (usize, usize)) -> bool {
        self.dataset == Some(dataset) && self.version <= n_trees && self.predictions.shape() == shape
    }
}

/// Cache entries keyed by dataset identity.
#[derive(Debug, Default)]
pub struct PredictionCache {
    entries: HashMap<DatasetId, PredictionCacheEntry>,
}

impl PredictionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry of `data`, created empty on first use.
    pub fn entry_mut<D: RowSource + ?Sized>(&mut self, data: &D) -> &mut PredictionCacheEntry {
        let id = data.id();
        self.entries.entry(id).or_insert_with(|| {
            log::trace!("new prediction cache entry for {id:?}");
            PredictionCacheEntry::new()
        })
    }

    pub fn get(&self, id: DatasetId) -> Option<&PredictionCacheEntry> {
        self.entries.get(&id)
    }

    /// Forget a dataset, e.g. once it is dropped by the caller.
    pub fn remove(&mut self, id: DatasetId) -> Option<PredictionCacheEntry> {
        self.entries.remove(&id)
    }

    /// Reset every entry, e.g. after the forest was replaced.
    pub fn invalidate_all(&mut self) {
        log::debug!("invalidating {} prediction cache entries", self.entries.len());
        self.entries.values_mut().for_each(PredictionCacheEntry::reset);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
