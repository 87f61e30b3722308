//! Row-major prediction results.

use approx::AbsDiffEq;
use serde::{Deserialize, Serialize};

/// A `n_rows x width` matrix stored row by row.
///
/// ```text
/// data[row * width + col]
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowMatrix<T> {
    data: Vec<T>,
    n_rows: usize,
    width: usize,
}

/// Margins: one value per row and output group.
pub type PredictionOutput = RowMatrix<f32>;

/// Leaf node reached by each row in each tree of the predicted range,
/// with column `tree - range.begin`.
pub type LeafIndices = RowMatrix<u32>;

impl<T: Copy + Default> RowMatrix<T> {
    pub fn zeros(n_rows: usize, width: usize) -> Self {
        Self {
            data: vec![T::default(); n_rows * width],
            n_rows,
            width,
        }
    }
}

impl<T> RowMatrix<T> {
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// `(n_rows, width)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.width)
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.width..(row + 1) * self.width]
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl PredictionOutput {
    #[inline]
    pub fn n_groups(&self) -> usize {
        self.width
    }
}

impl LeafIndices {
    #[inline]
    pub fn n_trees(&self) -> usize {
        self.width
    }
}

impl AbsDiffEq for PredictionOutput {
    type Epsilon = f32;

    fn default_epsilon() -> f32 {
        f32::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.shape() == other.shape() && self.data[..].abs_diff_eq(&other.data[..], epsilon)
    }
}
