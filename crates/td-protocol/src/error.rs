//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding touch events
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown event source name
    #[error("Unknown touch source: {0}")]
    UnknownSource(String),

    /// Line did not match `<SOURCE> <0|1>`
    #[error("Malformed event line: {0:?}")]
    Malformed(String),

    /// Line exceeds the maximum length without a terminator
    #[error("Line too long: {size} bytes exceeds maximum of {max} bytes")]
    LineTooLong { size: usize, max: usize },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
