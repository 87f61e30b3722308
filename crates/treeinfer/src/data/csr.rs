//! Compressed sparse row storage.

use ndarray::ArrayView2;

use super::DatasetError;

/// Borrowed CSR matrix: row `i` holds entries `indptr[i]..indptr[i + 1]`.
///
/// Absent entries are missing. Stored entries equal to the `missing`
/// sentinel (or `NaN`) are missing too.
#[derive(Debug, Clone, Copy)]
pub struct CsrView<'a> {
    indptr: &'a [usize],
    indices: &'a [u32],
    values: &'a [f32],
    n_features: usize,
    missing: f32,
}

impl<'a> CsrView<'a> {
    /// Validate and wrap CSR arrays.
    pub fn try_new(
        indptr: &'a [usize],
        indices: &'a [u32],
        values: &'a [f32],
        n_features: usize,
    ) -> Result<Self, DatasetError> {
        let (Some(&first), Some(&last)) = (indptr.first(), indptr.last()) else {
            return Err(DatasetError::EmptyIndptr);
        };
        if let Some(row) = indptr.windows(2).position(|w| w[0] > w[1]) {
            return Err(DatasetError::IndptrNotMonotonic { row });
        }
        let nnz = last - first;
        if indices.len() != values.len() || nnz != values.len() {
            return Err(DatasetError::ShapeMismatch {
                expected: nnz,
                actual: values.len().min(indices.len()),
            });
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= n_features) {
            return Err(DatasetError::FeatureOutOfRange { index, n_features });
        }
        Ok(Self {
            indptr,
            indices,
            values,
            n_features,
            missing: f32::NAN,
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
    pub fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Stored `(indices, values)` of a row.
    #[inline]
    pub fn row(&self, row: usize) -> (&'a [u32], &'a [f32]) {
        let range = self.indptr[row] - self.indptr[0]..self.indptr[row + 1] - self.indptr[0];
        (&self.indices[range.clone()], &self.values[range])
    }
}

/// Owned CSR matrix, used for dataset pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsrMatrix {
    indptr: Vec<usize>,
    indices: Vec<u32>,
    values: Vec<f32>,
    n_features: usize,
}

impl CsrMatrix {
    /// Validate and take ownership of CSR arrays.
    pub fn try_new(
        indptr: Vec<usize>,
        indices: Vec<u32>,
        values: Vec<f32>,
        n_features: usize,
    ) -> Result<Self, DatasetError> {
        CsrView::try_new(&indptr, &indices, &values, n_features)?;
        if indptr[0] != 0 {
            return Err(DatasetError::IndptrNotMonotonic { row: 0 });
        }
        Ok(Self {
            indptr,
            indices,
            values,
            n_features,
        })
    }

    /// Compress a dense matrix, dropping `NaN` entries.
    pub fn from_dense(data: ArrayView2<'_, f32>) -> Self {
        let mut builder = CsrBuilder::new(data.ncols());
        for row in data.rows() {
            builder.push_row(
                row.iter()
                    .enumerate()
                    .filter(|(_, v)| !v.is_nan())
                    .map(|(i, &v)| (i as u32, v)),
            );
        }
        builder.finish()
    }

    pub fn view(&self) -> CsrView<'_> {
        CsrView {
            indptr: &self.indptr,
            indices: &self.indices,
            values: &self.values,
            n_features: self.n_features,
            missing: f32::NAN,
        }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Row-by-row CSR construction.
#[derive(Debug, Clone)]
pub(crate) struct CsrBuilder {
    matrix: CsrMatrix,
}

impl CsrBuilder {
    pub(crate) fn new(n_features: usize) -> Self {
        Self {
            matrix: CsrMatrix {
                indptr: vec![0],
                indices: Vec::new(),
                values: Vec::new(),
                n_features,
            },
        }
    }

    pub(crate) fn push_row(&mut self, entries: impl IntoIterator<Item = (u32, f32)>) {
        for (index, value) in entries {
            self.matrix.indices.push(index);
            self.matrix.values.push(value);
        }
        self.matrix.indptr.push(self.matrix.values.len());
    }

    pub(crate) fn finish(self) -> CsrMatrix {
        self.matrix
    }
}
