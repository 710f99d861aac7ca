//! Error types for the Slidenotes service.

use thiserror::Error;

/// Main error type for Slidenotes operations.
#[derive(Error, Debug)]
pub enum SlidenotesError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encoding or decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for SlidenotesError {
    fn from(err: config::ConfigError) -> Self {
        SlidenotesError::Config(err.to_string())
    }
}

/// Result type alias for Slidenotes operations.
pub type Result<T> = std::result::Result<T, SlidenotesError>;
