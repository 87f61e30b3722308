//! Per-feature attribution of tree ensemble predictions.
//!
//! - [`shap`]: Tree SHAP contributions and interaction values

pub mod shap;

pub use shap::{ShapInteractions, ShapValues};
