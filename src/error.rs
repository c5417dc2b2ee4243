//! Error types for the pose mixture-density model.

use thiserror::Error;

/// Result type for pose model operations.
pub type PoseMdnResult<T> = Result<T, PoseMdnError>;

/// Errors that can occur while configuring, training, or sampling the model.
#[derive(Debug, Error)]
pub enum PoseMdnError {
    /// Tensor operation failed
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Shape mismatch
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Data loading error
    #[error("Data error: {0}")]
    Data(String),

    /// Training error
    #[error("Training error: {0}")]
    Training(String),

    /// Sampling error
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PoseMdnError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a data loading error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create a training error
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    /// Create a sampling error
    pub fn sampling(msg: impl Into<String>) -> Self {
        Self::Sampling(msg.into())
    }
}
