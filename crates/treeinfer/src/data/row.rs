//! Row batches and the per-thread dense row buffer.

use super::csr::CsrView;
use super::dense::SamplesView;

/// Reusable dense feature vector.
///
/// Sparse or sentinel-encoded rows are expanded into it before traversal;
/// entries never written are `NaN` (missing). Only the entries written by
/// the previous row are reset, so loading a sparse row costs O(nnz).
#[derive(Debug, Clone)]
pub struct RowBuffer {
    values: Vec<f32>,
    touched: Vec<usize>,
}

impl RowBuffer {
    pub fn new(n_features: usize) -> Self {
        Self {
            values: vec![f32::NAN; n_features],
            touched: Vec::new(),
        }
    }

    fn reset(&mut self) {
        for &i in &self.touched {
            self.values[i] = f32::NAN;
        }
        self.touched.clear();
    }

    #[inline]
    fn set(&mut self, index: usize, value: f32, missing: f32) {
        if value.is_nan() || value == missing || index >= self.values.len() {
            return;
        }
        self.values[index] = value;
        self.touched.push(index);
    }

    /// Load a dense row, mapping the sentinel to `NaN`.
    pub fn load_dense<'r>(&mut self, row: impl IntoIterator<Item = &'r f32>, missing: f32) -> &[f32] {
        self.reset();
        for (i, &v) in row.into_iter().enumerate() {
            self.set(i, v, missing);
        }
        &self.values
    }

    /// Load a sparse row given as parallel index/value slices.
    pub fn load_sparse(&mut self, indices: &[u32], values: &[f32], missing: f32) -> &[f32] {
        self.reset();
        for (&i, &v) in indices.iter().zip(values) {
            self.set(i as usize, v, missing);
        }
        &self.values
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

/// One batch of rows handed out by a [`RowSource`](super::RowSource).
#[derive(Debug, Clone, Copy)]
pub enum RowBatch<'a> {
    Dense(SamplesView<'a>),
    Sparse(CsrView<'a>),
}

impl<'a> RowBatch<'a> {
    #[inline]
    pub fn n_rows(&self) -> usize {
        match self {
            RowBatch::Dense(view) => view.n_samples(),
            RowBatch::Sparse(view) => view.n_rows(),
        }
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        match self {
            RowBatch::Dense(view) => view.n_features(),
            RowBatch::Sparse(view) => view.n_features(),
        }
    }

    /// Dense features of a row, missing values as `NaN`.
    ///
    /// Contiguous dense rows without a sentinel are returned without copying;
    /// everything else is expanded into `buffer`.
    #[inline]
    pub fn row<'b>(&'b self, row: usize, buffer: &'b mut RowBuffer) -> &'b [f32] {
        match self {
            RowBatch::Dense(view) => {
                if view.missing().is_nan() {
                    if let Some(slice) = view.row_slice(row) {
                        return slice;
                    }
                }
                buffer.load_dense(view.row(row).iter(), view.missing())
            }
            RowBatch::Sparse(view) => {
                let (indices, values) = view.row(row);
                buffer.load_sparse(indices, values, view.missing())
            }
        }
    }
}
