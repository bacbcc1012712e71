//! Error types shared across the core.
//!
//! `DataError` means "not enough data yet": callers skip the bar and move on.
//! `ConfigError` is raised at construction time and must stop the pipeline from starting.

use thiserror::Error;

/// Missing or undefined market data for a bar.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("insufficient lookback at bar {index}: need {required} bars of warmup")]
    InsufficientLookback { index: usize, required: usize },
    #[error("indicator '{name}' is undefined at bar {index}")]
    UndefinedIndicator { name: String, index: usize },
    #[error("bar index {index} out of range (series length {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("not enough price history: need {required}, have {available}")]
    InsufficientHistory { required: usize, available: usize },
}

/// Invalid or missing configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing required setting '{0}'")]
    Missing(String),
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Reject NaN/infinite or non-positive values.
pub(crate) fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(field, format!("must be > 0, got {value}")));
    }
    Ok(())
}

/// Reject values outside the closed unit interval.
pub(crate) fn require_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(field, format!("must be in [0, 1], got {value}")));
    }
    Ok(())
}
