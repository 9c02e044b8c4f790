//! Error types for calibration, detection and evaluation.

/// Crate-wide error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Unsupported reference statistics: {0}")]
    UnsupportedReference(String),

    #[error("Reference statistics schema mismatch: expected version {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::ShapeMismatch { expected: expected.into(), actual: actual.into() }
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Error::InvalidParameter(format!("array shape error: {e}"))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
