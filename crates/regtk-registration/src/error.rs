//! Error types for registration operations.

use thiserror::Error;
use regtk_core::TransformError;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Error in similarity evaluation.
    #[error("Metric error: {0}")]
    MetricError(String),

    /// Error in optimizer operation.
    #[error("Optimizer error: {0}")]
    OptimizerError(String),

    /// Error raised by a transformation or image geometry.
    #[error("Transform error: {0}")]
    TransformError(#[from] TransformError),

    /// Error in histogram construction, statistics or persistence.
    #[error("Histogram error: {0}")]
    HistogramError(String),

    /// No voxel of the target overlaps a valid source sample.
    #[error("No overlap: {0}")]
    NoOverlap(String),

    /// Numerical instability detected.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Dimension mismatch.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Reader or writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create a metric error.
    pub fn metric(msg: impl Into<String>) -> Self {
        Self::MetricError(msg.into())
    }

    /// Create an optimizer error.
    pub fn optimizer(msg: impl Into<String>) -> Self {
        Self::OptimizerError(msg.into())
    }

    /// Create a histogram error.
    pub fn histogram(msg: impl Into<String>) -> Self {
        Self::HistogramError(msg.into())
    }

    /// Create a no-overlap error.
    pub fn no_overlap(msg: impl Into<String>) -> Self {
        Self::NoOverlap(msg.into())
    }

    /// Create a numerical instability error.
    pub fn numerical_instability(msg: impl Into<String>) -> Self {
        Self::NumericalInstability(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RegistrationError::histogram("bad tag");
        assert!(matches!(err, RegistrationError::HistogramError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = RegistrationError::no_overlap("SSD evaluation");
        assert_eq!(err.to_string(), "No overlap: SSD evaluation");
    }

    #[test]
    fn test_transform_error_conversion() {
        let err: RegistrationError = TransformError::UnknownTypeCode(9).into();
        assert_eq!(err.to_string(), "Transform error: Unknown transformation type code: 9");
    }
}
