//! Zero-copy dense row-major view.

use ndarray::{ArrayView2, Axis};

use super::DatasetError;

/// Sample-major view `[n_samples, n_features]` over borrowed data.
///
/// Entries equal to the `missing` sentinel are treated as missing in
/// addition to `NaN`.
#[derive(Debug, Clone, Copy)]
pub struct SamplesView<'a> {
    data: ArrayView2<'a, f32>,
    missing: f32,
}

impl<'a> SamplesView<'a> {
    /// Create a samples view from an ndarray view.
    ///
    /// Any memory layout is accepted; C-order rows are read without copying.
    pub fn from_array(data: ArrayView2<'a, f32>) -> Self {
        Self {
            data,
            missing: f32::NAN,
        }
    }

    /// Create from a contiguous slice in sample-major (row-major) order.
    pub fn from_slice(
        data: &'a [f32],
        n_samples: usize,
        n_features: usize,
    ) -> Result<Self, DatasetError> {
        ArrayView2::from_shape((n_samples, n_features), data)
            .map(Self::from_array)
            .map_err(|_| DatasetError::ShapeMismatch {
                expected: n_samples * n_features,
                actual: data.len(),
            })
    }

    /// Treat `missing` as a missing-value sentinel.
    pub fn with_missing(mut self, missing: f32) -> Self {
        self.missing = missing;
        self
    }

    #[inline]
    pub fn missing(&self) -> f32 {
        self.missing
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    /// Get feature value at (sample, feature).
    #[inline]
    pub fn get(&self, sample: usize, feature: usize) -> f32 {
        self.data[[sample, feature]]
    }

    /// Contiguous row slice, if the underlying layout has one.
    #[inline]
    pub fn row_slice(&self, sample: usize) -> Option<&'a [f32]> {
        self.data.index_axis_move(Axis(0), sample).to_slice()
    }

    /// Row as an ndarray view (possibly strided).
    #[inline]
    pub fn row(&self, sample: usize) -> ndarray::ArrayView1<'_, f32> {
        self.data.row(sample)
    }
}
