//! Data input: row accessors, dense and sparse views, and datasets.
//!
//! - [`SampleAccessor`]: one dense row, `NaN` = missing
//! - [`SamplesView`] / [`CsrView`]: zero-copy views over caller data
//! - [`Dataset`]: owned, possibly multi-page data with metadata
//! - [`RowSource`]: what prediction consumes (datasets and in-place adapters)

mod accessor;
mod csr;
mod dataset;
mod dense;
mod row;

pub use accessor::SampleAccessor;
pub use csr::{CsrMatrix, CsrView};
pub use dataset::{DataSplit, Dataset, DatasetId, DatasetInfo, InplaceData, RowSource};
pub use dense::SamplesView;
pub use row::{RowBatch, RowBuffer};

/// Errors building or slicing datasets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatasetError {
    #[error("expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("CSR indptr must have at least one entry")]
    EmptyIndptr,
    #[error("CSR indptr decreases after row {row}")]
    IndptrNotMonotonic { row: usize },
    #[error("feature index {index} out of range for {n_features} features")]
    FeatureOutOfRange { index: u32, n_features: usize },
    #[error("rank {rank} is not valid for world size {world_size}")]
    InvalidPartition { rank: usize, world_size: usize },
    #[error("page size must be at least one row")]
    ZeroPageRows,
}
