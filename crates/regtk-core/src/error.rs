//! Error types for images, geometry and transformations.

use thiserror::Error;

/// Error type for the core crate.
#[derive(Error, Debug)]
pub enum TransformError {
    /// Underlying reader or writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary record did not start with the transformation magic number.
    #[error("Invalid magic number: expected {expected}, found {found}")]
    InvalidMagic { expected: u32, found: u32 },

    /// Type code in a transformation record is not known.
    #[error("Unknown transformation type code: {0}")]
    UnknownTypeCode(u32),

    /// Neither the binary format nor any legacy signature matched.
    #[error("Unrecognized transformation file: {0}")]
    UnrecognizedFormat(String),

    /// DOF index past the end of the parameter vector.
    #[error("DOF index {index} out of range for {count} DOFs")]
    DofIndexOutOfRange { index: usize, count: usize },

    /// A DOF or gradient vector has the wrong length.
    #[error("DOF count mismatch: expected {expected}, got {actual}")]
    DofCountMismatch { expected: usize, actual: usize },

    /// Control point lattice is malformed.
    #[error("Invalid lattice: {0}")]
    InvalidLattice(String),

    /// Image geometry is malformed.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Matrix inversion failed.
    #[error("Transformation not invertible: {0}")]
    NotInvertible(String),

    /// Text or binary payload could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Tensor data could not be converted to or from a host buffer.
    #[error("Tensor data error: {0}")]
    TensorData(String),

    /// Operation is not available for this transformation variant.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, TransformError>;

impl TransformError {
    pub fn dof_count(expected: usize, actual: usize) -> Self {
        Self::DofCountMismatch { expected, actual }
    }

    pub fn invalid_lattice(msg: impl Into<String>) -> Self {
        Self::InvalidLattice(msg.into())
    }

    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    pub fn not_invertible(msg: impl Into<String>) -> Self {
        Self::NotInvertible(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn tensor_data(msg: impl Into<String>) -> Self {
        Self::TensorData(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn dof_index(index: usize, count: usize) -> Self {
        Self::DofIndexOutOfRange { index, count }
    }
}
