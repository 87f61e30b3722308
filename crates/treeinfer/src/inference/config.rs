//! Predictor configuration with builder pattern.
//!
//! # Example
//!
//! ```
//! use std::num::NonZeroUsize;
//! use treeinfer::PredictorConfig;
//!
//! // All defaults
//! let config = PredictorConfig::builder().build().unwrap();
//! assert_eq!(config.block_size, 64);
//!
//! let config = PredictorConfig::builder()
//!     .block_size(128)
//!     .n_threads(NonZeroUsize::new(4).unwrap())
//!     .build()
//!     .unwrap();
//! ```

use std::num::NonZeroUsize;

use bon::Builder;

/// Default block size for batch processing (matches XGBoost).
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// Invalid predictor configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("block_size must be at least 1")]
    InvalidBlockSize,
}

/// Tuning knobs shared by every prediction operation.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct PredictorConfig {
    /// Rows processed together by one worker thread. Default: 64.
    #[builder(default = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Number of threads. `None` uses the current rayon pool.
    pub n_threads: Option<NonZeroUsize>,
}

/// Custom finishing function that validates the config.
impl<S: predictor_config_builder::IsComplete> PredictorConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBlockSize`] when `block_size == 0`.
    pub fn build(self) -> Result<PredictorConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl PredictorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::InvalidBlockSize);
        }
        Ok(())
    }

    /// Thread count in `run_with_threads` terms (0 = current pool).
    pub(crate) fn thread_count(&self) -> usize {
        self.n_threads.map_or(0, NonZeroUsize::get)
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            n_threads: None,
        }
    }
}
