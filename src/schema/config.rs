//! Configuration types for candidate screening.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::compute::DimensionalType;

fn default_sample_ratio() -> f64 {
    0.05
}

fn default_sample_threshold() -> f64 {
    1000.0
}

fn default_sample_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// Which cheap checks run before full evaluation, and their parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningConfig {
    /// Run interval-arithmetic screening.
    #[serde(default = "default_true")]
    pub interval: bool,
    /// Run the subset-sample screen.
    #[serde(default = "default_true")]
    pub subset: bool,
    /// Fraction of rows drawn for the subset screen, in (0, 1].
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,
    /// Subset MSE above this value rejects the candidate.
    #[serde(default = "default_sample_threshold")]
    pub sample_threshold: f64,
    /// Seed for drawing the subset sample.
    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,
    /// Physical dimensions of features and target. `None` disables the
    /// dimensional check entirely.
    #[serde(default)]
    pub dimensional: Option<DimensionalConfig>,
    /// Reject programs whose sines nest deeper than this. `None` disables the
    /// grammar check.
    #[serde(default)]
    pub max_sine_depth: Option<usize>,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            interval: true,
            subset: true,
            sample_ratio: default_sample_ratio(),
            sample_threshold: default_sample_threshold(),
            sample_seed: default_sample_seed(),
            dimensional: None,
            max_sine_depth: None,
        }
    }
}

impl ScreeningConfig {
    /// Screening disabled: every candidate goes straight to full evaluation.
    pub fn disabled() -> Self {
        Self {
            interval: false,
            subset: false,
            ..Default::default()
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_ratio > 0.0 && self.sample_ratio <= 1.0) {
            return Err(ConfigError::InvalidSampleRatio(self.sample_ratio));
        }
        if self.sample_threshold.is_nan() || self.sample_threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(self.sample_threshold));
        }
        Ok(())
    }
}

/// Physical dimensions for dimensional screening.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DimensionalConfig {
    /// Feature index to dimension. Unmapped features are unknown.
    #[serde(default)]
    pub features: HashMap<usize, DimensionalType>,
    /// Required dimension of the program output.
    #[serde(default)]
    pub target: DimensionalType,
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Sample ratio must be in (0, 1], got {0}")]
    InvalidSampleRatio(f64),
    #[error("Screening threshold must be positive, got {0}")]
    InvalidThreshold(f64),
    #[error("Epsilon must be in [0, 1], got {0}")]
    InvalidEpsilon(f64),
    #[error("Tournament size must be non-zero")]
    InvalidTournamentSize,
}
