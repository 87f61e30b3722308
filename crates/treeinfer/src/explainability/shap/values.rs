//! SHAP values containers.
//!
//! Stores SHAP values for a batch of samples with proper indexing
//! and verification utilities.

/// Container for SHAP values.
///
/// Stores per-sample, per-output, per-feature SHAP contributions.
/// Layout is [samples × outputs × (features + 1)] where the last slot of
/// each output is the bias (expected value plus base margin).
#[derive(Clone, Debug, PartialEq)]
pub struct ShapValues {
    /// Flat storage: [sample][output][feature + bias]
    values: Vec<f64>,
    n_samples: usize,
    /// Number of features (not including the bias slot)
    n_features: usize,
    /// Number of outputs (1 for regression, n_classes for multiclass)
    n_outputs: usize,
}

impl ShapValues {
    /// Create a new container initialized to zeros.
    pub fn zeros(n_samples: usize, n_features: usize, n_outputs: usize) -> Self {
        let values = vec![0.0; n_samples * n_outputs * (n_features + 1)];
        Self {
            values,
            n_samples,
            n_features,
            n_outputs,
        }
    }

    pub(crate) fn from_vec(values: Vec<f64>, n_samples: usize, n_features: usize, n_outputs: usize) -> Self {
        debug_assert_eq!(values.len(), n_samples * n_outputs * (n_features + 1));
        Self {
            values,
            n_samples,
            n_features,
            n_outputs,
        }
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Number of features (not including the bias slot).
    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[inline]
    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    #[inline]
    fn index(&self, sample: usize, feature: usize, output: usize) -> usize {
        (sample * self.n_outputs + output) * (self.n_features + 1) + feature
    }

    /// Get SHAP value for a specific sample, feature, and output.
    #[inline]
    pub fn get(&self, sample: usize, feature: usize, output: usize) -> f64 {
        self.values[self.index(sample, feature, output)]
    }

    #[inline]
    pub fn set(&mut self, sample: usize, feature: usize, output: usize, value: f64) {
        let idx = self.index(sample, feature, output);
        self.values[idx] = value;
    }

    #[inline]
    pub fn add(&mut self, sample: usize, feature: usize, output: usize, delta: f64) {
        let idx = self.index(sample, feature, output);
        self.values[idx] += delta;
    }

    /// Get the bias (expected value) for a sample and output.
    ///
    /// The bias is stored at feature index = n_features.
    #[inline]
    pub fn base_value(&self, sample: usize, output: usize) -> f64 {
        self.get(sample, self.n_features, output)
    }

    #[inline]
    pub fn set_base_value(&mut self, sample: usize, output: usize, value: f64) {
        self.set(sample, self.n_features, output, value);
    }

    /// All values of one sample and output, bias last.
    pub fn row(&self, sample: usize, output: usize) -> &[f64] {
        let start = self.index(sample, 0, output);
        &self.values[start..start + self.n_features + 1]
    }

    /// All values of one sample (every output, each with its bias).
    pub fn sample(&self, sample: usize) -> &[f64] {
        let len = self.n_outputs * (self.n_features + 1);
        &self.values[sample * len..(sample + 1) * len]
    }

    /// Feature SHAP values only (excluding the bias) for a sample and output.
    pub fn feature_shap(&self, sample: usize, output: usize) -> &[f64] {
        &self.row(sample, output)[..self.n_features]
    }

    /// Sum of all features and the bias for a sample and output.
    pub fn total(&self, sample: usize, output: usize) -> f64 {
        self.row(sample, output).iter().sum()
    }

    /// Verify that SHAP values satisfy the sum property.
    ///
    /// For each sample: sum(shap_values) + base_value ≈ prediction, with
    /// predictions laid out `[sample][output]`.
    ///
    /// Returns `true` if all samples are within tolerance.
    pub fn verify(&self, predictions: &[f32], tolerance: f64) -> bool {
        if predictions.len() != self.n_samples * self.n_outputs {
            return false;
        }

        (0..self.n_samples).all(|sample| {
            (0..self.n_outputs).all(|output| {
                let pred = f64::from(predictions[sample * self.n_outputs + output]);
                (self.total(sample, output) - pred).abs() <= tolerance
            })
        })
    }

    /// Get the raw values slice.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }

    /// Returns (data, shape) where shape is (n_samples, n_outputs, n_features + 1).
    pub fn to_3d(&self) -> (&[f64], (usize, usize, usize)) {
        (&self.values, (self.n_samples, self.n_outputs, self.n_features + 1))
    }
}

/// Container for SHAP interaction values.
///
/// Layout is [samples × outputs × (features + 1) × (features + 1)]. Entry
/// `(i, j)` with `i != j` is half the interaction between features `i` and
/// `j`; the diagonal holds each feature's main effect, and `(F, F)` holds
/// the bias. Each matrix row sums to that feature's SHAP value.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapInteractions {
    values: Vec<f64>,
    n_samples: usize,
    n_features: usize,
    n_outputs: usize,
}

impl ShapInteractions {
    pub fn zeros(n_samples: usize, n_features: usize, n_outputs: usize) -> Self {
        let side = n_features + 1;
        Self {
            values: vec![0.0; n_samples * n_outputs * side * side],
            n_samples,
            n_features,
            n_outputs,
        }
    }

    pub(crate) fn from_vec(values: Vec<f64>, n_samples: usize, n_features: usize, n_outputs: usize) -> Self {
        debug_assert_eq!(values.len(), n_samples * n_outputs * (n_features + 1) * (n_features + 1));
        Self {
            values,
            n_samples,
            n_features,
            n_outputs,
        }
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[inline]
    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    #[inline]
    fn index(&self, sample: usize, output: usize, i: usize, j: usize) -> usize {
        let side = self.n_features + 1;
        ((sample * self.n_outputs + output) * side + i) * side + j
    }

    #[inline]
    pub fn get(&self, sample: usize, output: usize, i: usize, j: usize) -> f64 {
        self.values[self.index(sample, output, i, j)]
    }

    /// The `(F + 1) x (F + 1)` matrix of one sample and output, row-major.
    pub fn matrix(&self, sample: usize, output: usize) -> &[f64] {
        let side = self.n_features + 1;
        let start = self.index(sample, output, 0, 0);
        &self.values[start..start + side * side]
    }

    /// Collapse each matrix row into a plain contribution.
    pub fn to_contributions(&self) -> ShapValues {
        let side = self.n_features + 1;
        let values = self.values.chunks_exact(side).map(|row| row.iter().sum()).collect();
        ShapValues::from_vec(values, self.n_samples, self.n_features, self.n_outputs)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns (data, shape) where shape is
    /// (n_samples, n_outputs, n_features + 1, n_features + 1).
    pub fn to_4d(&self) -> (&[f64], (usize, usize, usize, usize)) {
        let side = self.n_features + 1;
        (&self.values, (self.n_samples, self.n_outputs, side, side))
    }
}
