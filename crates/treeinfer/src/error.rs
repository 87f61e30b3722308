//! Error types surfaced by prediction operations.

use crate::collective::CollectiveError;
use crate::data::DatasetError;
use crate::repr::gbdt::{ForestValidationError, NodeId};

/// Errors returned by [`Predictor`](crate::Predictor) operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictError {
    /// The operation cannot run on a column-split dataset.
    #[error("{operation} is not supported for column-split data")]
    ColumnSplitUnsupported { operation: &'static str },

    #[error("invalid forest: {0}")]
    InvalidForest(#[from] ForestValidationError),

    /// SHAP needs node covers for every tree that has splits.
    #[error("tree {tree_idx} has splits but no cover statistics")]
    MissingCovers { tree_idx: usize },

    #[error("tree range [{begin}, {end}) is invalid for a forest of {n_trees} trees")]
    InvalidTreeRange {
        begin: usize,
        end: usize,
        n_trees: usize,
    },

    #[error("output buffer has length {actual}, expected {expected}")]
    OutputShape { expected: usize, actual: usize },

    #[error("base margin has length {actual}, expected {expected}")]
    BaseMarginShape { expected: usize, actual: usize },

    /// The data has more columns than the model was trained on.
    #[error("data has {data} features but the model only knows {model}")]
    FeatureCountMismatch { data: usize, model: usize },

    /// A categorical split saw a value that is neither in its left nor in its
    /// right category set, or that is not a valid category at all.
    #[error("tree {tree_idx} node {node}: unknown category {value} for feature {feature}")]
    UnknownCategory {
        tree_idx: usize,
        node: NodeId,
        feature: u32,
        value: f32,
    },

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Collective(#[from] CollectiveError),
}
