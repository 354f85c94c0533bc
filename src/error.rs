//! Error types for Centinela operations.
//!
//! Provides rich error context for library consumers.

use std::fmt;

/// Main error type for Centinela operations.
///
/// Record-level problems (a single transaction with a bad amount) are
/// collected into rejected-record reports by the pipeline and never surface
/// here; this type covers the failures that abort a requested operation.
///
/// # Examples
///
/// ```
/// use centinela::error::CentinelaError;
///
/// let err = CentinelaError::InvalidParameter {
///     param: "contamination".to_string(),
///     value: "0.9".to_string(),
///     constraint: "in (0, 0.5]".to_string(),
/// };
/// assert!(err.to_string().contains("contamination"));
/// ```
#[derive(Debug)]
pub enum CentinelaError {
    /// Input batch is missing a required column or is structurally unusable.
    Schema {
        /// What was wrong with the batch schema
        message: String,
    },

    /// A specific record handed directly to the engine was invalid.
    InvalidRecord {
        /// Position of the offending record
        index: usize,
        /// What was wrong with it
        detail: String,
    },

    /// Too few records to fit with the configured subsample size.
    InsufficientData {
        /// Records required
        required: usize,
        /// Records available
        actual: usize,
    },

    /// Invalid hyperparameter value provided.
    InvalidParameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Persisted model artifact failed validation or the version check.
    CorruptModel {
        /// Why the artifact was rejected
        message: String,
    },

    /// Detection requested with no fitted model and no training data.
    ModelNotFound {
        /// What was missing
        message: String,
    },

    /// I/O error (file not found, permission denied, etc.).
    Io(std::io::Error),

    /// Serialization/deserialization error.
    Serialization(String),
}

impl fmt::Display for CentinelaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CentinelaError::Schema { message } => {
                write!(f, "Schema error: {message}")
            }
            CentinelaError::InvalidRecord { index, detail } => {
                write!(f, "Invalid record at index {index}: {detail}")
            }
            CentinelaError::InsufficientData { required, actual } => {
                write!(
                    f,
                    "Insufficient data: {required} records required, {actual} available"
                )
            }
            CentinelaError::InvalidParameter {
                param,
                value,
                constraint,
            } => {
                write!(
                    f,
                    "Invalid parameter: {param} = {value}, expected {constraint}"
                )
            }
            CentinelaError::CorruptModel { message } => {
                write!(f, "Corrupt model: {message}")
            }
            CentinelaError::ModelNotFound { message } => {
                write!(f, "Model not found: {message}")
            }
            CentinelaError::Io(e) => write!(f, "I/O error: {e}"),
            CentinelaError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
        }
    }
}

impl std::error::Error for CentinelaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CentinelaError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CentinelaError {
    fn from(err: std::io::Error) -> Self {
        CentinelaError::Io(err)
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, CentinelaError>;
