//! SHAP (SHapley Additive exPlanations) for tree ensembles.
//!
//! Contributions are computed per row and per tree by the exact Tree SHAP
//! recursion, or by the single-path approximation when requested. Both run
//! through the same row-block driver as score prediction.

mod contributions;
mod tree_shap;
mod values;

pub use values::{ShapInteractions, ShapValues};

pub(crate) use contributions::{ContributionVisitor, InteractionVisitor};
