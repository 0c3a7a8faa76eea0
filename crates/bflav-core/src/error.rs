//! Error types for bflav

use thiserror::Error;

/// bflav error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed model configuration, rejected at construction time.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Wiring error detected while evaluating (unknown state, bad integral code, ...).
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
