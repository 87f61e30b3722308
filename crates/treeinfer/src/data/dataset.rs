//! Datasets as batch-streaming row sources.

use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::error::PredictError;

use super::csr::{CsrBuilder, CsrMatrix, CsrView};
use super::dense::SamplesView;
use super::row::{RowBatch, RowBuffer};
use super::DatasetError;

// =============================================================================
// Identity and metadata
// =============================================================================

/// Process-unique dataset identity, used to key prediction caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(u64);

impl DatasetId {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// How a dataset is partitioned across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataSplit {
    /// Every worker holds complete rows.
    #[default]
    Row,
    /// Every worker holds all rows but only the features it owns.
    Column { rank: usize, world_size: usize },
}

impl DataSplit {
    #[inline]
    pub fn is_column(&self) -> bool {
        matches!(self, DataSplit::Column { .. })
    }

    /// Whether this worker holds the values of `feature`.
    ///
    /// Feature `f` belongs to rank `f % world_size`.
    #[inline]
    pub fn owns(&self, feature: usize) -> bool {
        match *self {
            DataSplit::Row => true,
            DataSplit::Column { rank, world_size } => feature % world_size == rank,
        }
    }

    /// The features this worker holds, in increasing order.
    pub fn owned_features(self, n_features: usize) -> impl Iterator<Item = usize> {
        let (first, step) = match self {
            DataSplit::Row => (0, 1),
            DataSplit::Column { rank, world_size } => (rank, world_size),
        };
        (first..n_features).step_by(step)
    }

    /// Position of an owned `feature` within [`owned_features`](Self::owned_features).
    #[inline]
    pub fn local_index(&self, feature: usize) -> usize {
        match *self {
            DataSplit::Row => feature,
            DataSplit::Column { world_size, .. } => feature / world_size,
        }
    }
}

/// Shape and partitioning metadata of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub n_rows: usize,
    /// Global feature count (column-split workers report the full width).
    pub n_features: usize,
    pub data_split: DataSplit,
    /// Per-row initial margins, `n_rows x n_groups`, replacing the base score.
    pub base_margin: Option<Array2<f32>>,
}

impl DatasetInfo {
    pub fn new(n_rows: usize, n_features: usize) -> Self {
        Self {
            n_rows,
            n_features,
            data_split: DataSplit::Row,
            base_margin: None,
        }
    }
}

// =============================================================================
// RowSource
// =============================================================================

/// A dataset that hands out its rows as a sequence of batches.
///
/// Batches are visited in order. Each batch view is only valid inside the
/// callback, so a source may page data in and drop it again.
pub trait RowSource: Sync {
    fn id(&self) -> DatasetId;

    fn info(&self) -> &DatasetInfo;

    /// Call `f(first_row, batch)` for every batch in order.
    fn for_each_batch(
        &self,
        f: &mut dyn FnMut(usize, RowBatch<'_>) -> Result<(), PredictError>,
    ) -> Result<(), PredictError>;
}

// =============================================================================
// Dataset
// =============================================================================

#[derive(Debug, Clone)]
enum Page {
    Dense(Array2<f32>),
    Sparse(CsrMatrix),
}

impl Page {
    fn n_rows(&self) -> usize {
        match self {
            Page::Dense(data) => data.nrows(),
            Page::Sparse(csr) => csr.n_rows(),
        }
    }

    fn batch(&self) -> RowBatch<'_> {
        match self {
            Page::Dense(data) => RowBatch::Dense(SamplesView::from_array(data.view())),
            Page::Sparse(csr) => RowBatch::Sparse(csr.view()),
        }
    }

    fn split_rows(self, page_rows: usize) -> Vec<Page> {
        let n_rows = self.n_rows();
        if n_rows <= page_rows {
            return vec![self];
        }
        (0..n_rows)
            .step_by(page_rows)
            .map(|start| {
                let end = (start + page_rows).min(n_rows);
                match &self {
                    Page::Dense(data) => Page::Dense(data.slice(s![start..end, ..]).to_owned()),
                    Page::Sparse(csr) => {
                        let view = csr.view();
                        let mut builder = CsrBuilder::new(csr.n_features());
                        for row in start..end {
                            let (indices, values) = view.row(row);
                            builder.push_row(indices.iter().copied().zip(values.iter().copied()));
                        }
                        Page::Sparse(builder.finish())
                    }
                }
            })
            .collect()
    }
}

/// Owned, possibly multi-page dataset.
///
/// Pages emulate external-memory data: rows are streamed page by page and
/// prediction code never sees more than one page at a time.
///
/// Every clone, and every change of the initial margins, gets a fresh
/// [`DatasetId`]. Re-paging keeps the identity since the rows are unchanged.
#[derive(Debug)]
pub struct Dataset {
    id: DatasetId,
    info: DatasetInfo,
    pages: Vec<Page>,
}

impl Dataset {
    /// Dense dataset; `NaN` marks missing values.
    pub fn from_dense(data: Array2<f32>) -> Self {
        let info = DatasetInfo::new(data.nrows(), data.ncols());
        Self {
            id: DatasetId::next(),
            info,
            pages: vec![Page::Dense(data)],
        }
    }

    /// Dense dataset where `missing` also marks missing values.
    pub fn from_dense_with_missing(mut data: Array2<f32>, missing: f32) -> Self {
        if !missing.is_nan() {
            data.mapv_inplace(|v| if v == missing { f32::NAN } else { v });
        }
        Self::from_dense(data)
    }

    /// Sparse dataset; absent entries are missing.
    pub fn from_csr(csr: CsrMatrix) -> Self {
        let info = DatasetInfo::new(csr.n_rows(), csr.n_features());
        Self {
            id: DatasetId::next(),
            info,
            pages: vec![Page::Sparse(csr)],
        }
    }

    /// Re-page the data into pages of at most `page_rows` rows.
    pub fn with_page_rows(mut self, page_rows: usize) -> Result<Self, DatasetError> {
        if page_rows == 0 {
            return Err(DatasetError::ZeroPageRows);
        }
        self.pages = self
            .pages
            .into_iter()
            .flat_map(|page| page.split_rows(page_rows))
            .collect();
        Ok(self)
    }

    /// Attach per-row initial margins (`n_rows x n_groups`).
    pub fn with_base_margin(mut self, base_margin: Array2<f32>) -> Self {
        self.info.base_margin = Some(base_margin);
        self.id = DatasetId::next();
        self
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.info.n_rows
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.info.n_features
    }

    #[inline]
    pub fn n_pages(&self) -> usize {
        self.pages.len()
    }

    /// The share of a column-split deployment held by worker `rank`.
    ///
    /// Keeps every row but only the features owned by `rank` (feature `f`
    /// goes to rank `f % world_size`). Feature indices stay global. The
    /// result gets a fresh identity.
    pub fn slice_columns(&self, world_size: usize, rank: usize) -> Result<Self, DatasetError> {
        if world_size == 0 || rank >= world_size {
            return Err(DatasetError::InvalidPartition { rank, world_size });
        }
        let split = DataSplit::Column { rank, world_size };

        let pages = self
            .pages
            .iter()
            .map(|page| {
                let batch = page.batch();
                let mut builder = CsrBuilder::new(self.n_features());
                let mut buffer = RowBuffer::new(self.n_features());
                for row in 0..batch.n_rows() {
                    let values = batch.row(row, &mut buffer);
                    builder.push_row(
                        values
                            .iter()
                            .enumerate()
                            .filter(|&(f, v)| split.owns(f) && !v.is_nan())
                            .map(|(f, &v)| (f as u32, v)),
                    );
                }
                Page::Sparse(builder.finish())
            })
            .collect();

        Ok(Self {
            id: DatasetId::next(),
            info: DatasetInfo {
                data_split: split,
                ..self.info.clone()
            },
            pages,
        })
    }
}

impl Clone for Dataset {
    fn clone(&self) -> Self {
        Self {
            id: DatasetId::next(),
            info: self.info.clone(),
            pages: self.pages.clone(),
        }
    }
}

impl RowSource for Dataset {
    fn id(&self) -> DatasetId {
        self.id
    }

    fn info(&self) -> &DatasetInfo {
        &self.info
    }

    fn for_each_batch(
        &self,
        f: &mut dyn FnMut(usize, RowBatch<'_>) -> Result<(), PredictError>,
    ) -> Result<(), PredictError> {
        let mut first_row = 0;
        for page in &self.pages {
            let batch = page.batch();
            let n_rows = batch.n_rows();
            f(first_row, batch)?;
            first_row += n_rows;
        }
        Ok(())
    }
}

// =============================================================================
// In-place adapters
// =============================================================================

/// Borrowed caller data used by in-place prediction, without building a
/// [`Dataset`]. Identity follows the same rules as [`Dataset`].
#[derive(Debug)]
pub struct InplaceData<'a> {
    id: DatasetId,
    info: DatasetInfo,
    batch: RowBatch<'a>,
}

impl<'a> InplaceData<'a> {
    pub fn dense(view: SamplesView<'a>) -> Self {
        Self::from_batch(RowBatch::Dense(view))
    }

    pub fn csr(view: CsrView<'a>) -> Self {
        Self::from_batch(RowBatch::Sparse(view))
    }

    fn from_batch(batch: RowBatch<'a>) -> Self {
        Self {
            id: DatasetId::next(),
            info: DatasetInfo::new(batch.n_rows(), batch.n_features()),
            batch,
        }
    }

    /// Attach per-row initial margins (`n_rows x n_groups`).
    pub fn with_base_margin(mut self, base_margin: Array2<f32>) -> Self {
        self.info.base_margin = Some(base_margin);
        self.id = DatasetId::next();
        self
    }

    /// Mark the rows as this worker's share of a column-split dataset.
    pub fn with_data_split(mut self, data_split: DataSplit) -> Self {
        self.info.data_split = data_split;
        self
    }
}

impl Clone for InplaceData<'_> {
    fn clone(&self) -> Self {
        Self {
            id: DatasetId::next(),
            info: self.info.clone(),
            batch: self.batch,
        }
    }
}

impl RowSource for InplaceData<'_> {
    fn id(&self) -> DatasetId {
        self.id
    }

    fn info(&self) -> &DatasetInfo {
        &self.info
    }

    fn for_each_batch(
        &self,
        f: &mut dyn FnMut(usize, RowBatch<'_>) -> Result<(), PredictError>,
    ) -> Result<(), PredictError> {
        f(0, self.batch)
    }
}
