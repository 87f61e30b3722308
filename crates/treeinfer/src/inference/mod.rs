//! Inference for trained tree ensembles.
//!
//! # Module Structure
//!
//! - [`Predictor`]: entry points for margins, leaf indices and SHAP values
//! - [`PredictorConfig`]: block size and thread count
//! - [`PredictionOutput`] / [`LeafIndices`]: row-major results ([`RowMatrix`])
//! - [`PredictionCache`]: incremental margins kept across boosting rounds
//!
//! Rows are processed in blocks of [`PredictorConfig::block_size`] rows in
//! parallel. Within a row, trees are always visited in ensemble order, so
//! results do not depend on the thread count or the block size.

mod cache;
mod column_split;
mod config;
mod output;
mod predictor;
pub(crate) mod traversal;

pub use cache::{PredictionCache, PredictionCacheEntry};
pub use config::{ConfigError, PredictorConfig, DEFAULT_BLOCK_SIZE};
pub use output::{LeafIndices, PredictionOutput, RowMatrix};
pub use predictor::Predictor;
