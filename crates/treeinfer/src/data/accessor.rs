//! Sample accessor trait for tree traversal.
//!
//! [`SampleAccessor`] is implemented by `[f32]` directly, allowing slices to
//! be used for tree traversal without wrapper types. Rows are dense: a
//! missing value is `NaN`, and a feature index past the end of the row is
//! missing too, so rows narrower than the model ("lesser features") can be
//! predicted.

// ============================================================================
// SampleAccessor Trait
// ============================================================================

/// Access features for a single sample.
///
/// # Example
///
/// ```
/// use treeinfer::data::SampleAccessor;
///
/// let features: &[f32] = &[0.5, 1.2, 3.4];
/// assert_eq!(features.feature(0), 0.5);
/// assert!(features.feature(7).is_nan());
/// assert_eq!(features.n_features(), 3);
/// ```
pub trait SampleAccessor {
    /// Get the feature value at the given index.
    ///
    /// Returns `f32::NAN` for missing or absent values.
    fn feature(&self, index: usize) -> f32;

    /// Number of features in this sample.
    fn n_features(&self) -> usize;
}

impl SampleAccessor for [f32] {
    #[inline]
    fn feature(&self, index: usize) -> f32 {
        self.get(index).copied().unwrap_or(f32::NAN)
    }

    #[inline]
    fn n_features(&self) -> usize {
        self.len()
    }
}

// Enables &[0.5f32, 1.0] syntax.
impl<const N: usize> SampleAccessor for [f32; N] {
    #[inline]
    fn feature(&self, index: usize) -> f32 {
        self.as_slice().feature(index)
    }

    #[inline]
    fn n_features(&self) -> usize {
        N
    }
}

impl SampleAccessor for Vec<f32> {
    #[inline]
    fn feature(&self, index: usize) -> f32 {
        self.as_slice().feature(index)
    }

    #[inline]
    fn n_features(&self) -> usize {
        self.len()
    }
}

// ndarray rows may be contiguous or strided.
impl SampleAccessor for ndarray::ArrayView1<'_, f32> {
    #[inline]
    fn feature(&self, index: usize) -> f32 {
        self.get(index).copied().unwrap_or(f32::NAN)
    }

    #[inline]
    fn n_features(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn absent_features_are_missing() {
        let row = [1.0f32, 2.0];
        assert_eq!(row.feature(1), 2.0);
        assert!(row.feature(2).is_nan());
        assert!(vec![1.0f32].feature(5).is_nan());
    }

    #[test]
    fn strided_ndarray_rows() {
        let m = array![[1.0f32, 2.0], [3.0, 4.0]];
        let col = m.column(1);
        assert_eq!(col.feature(0), 2.0);
        assert_eq!(col.feature(1), 4.0);
        assert!(col.feature(2).is_nan());
    }
}
