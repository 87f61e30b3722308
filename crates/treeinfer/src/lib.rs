//! treeinfer: CPU inference for gradient boosted decision tree ensembles.
//!
//! Given a [`Forest`] of regression trees (scalar or vector leaves) and a
//! dataset, the [`Predictor`] computes raw margins, leaf indices, and
//! Tree SHAP explanations. Datasets may be split by columns across several
//! workers, in which case traversal runs level by level over a
//! [`Communicator`].
//!
//! # Key Types
//!
//! - [`Forest`] / [`Tree`] - Structure-of-arrays tree ensembles
//! - [`Dataset`] / [`InplaceData`] - Row sources (dense, CSR, paged)
//! - [`Predictor`] / [`PredictorConfig`] - Prediction entry points
//! - [`ShapValues`] / [`ShapInteractions`] - Explanation outputs
//! - [`PredictionCache`] - Incremental margins for training-time datasets

// Re-export approx traits for users who want to compare predictions
pub use approx;

pub mod collective;
pub mod data;
pub mod error;
pub mod explainability;
pub mod inference;
pub mod repr;
pub mod testing;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use collective::{CollectiveError, Communicator, InMemoryCommunicator, LocalCommunicator};
pub use data::{
    CsrView, DataSplit, Dataset, DatasetError, DatasetId, DatasetInfo, InplaceData, RowSource,
    SamplesView,
};
pub use error::PredictError;
pub use explainability::shap::{ShapInteractions, ShapValues};
pub use inference::{
    ConfigError, LeafIndices, PredictionCache, PredictionCacheEntry, PredictionOutput, Predictor,
    PredictorConfig, RowMatrix,
};
pub use repr::gbdt::{Forest, ScalarLeaf, Tree, TreeRange, TreeView, VectorLeaf};
pub use utils::{run_with_threads, Parallelism};
