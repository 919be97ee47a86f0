//! Error types for lodcrate

use thiserror::Error;

/// Main error type for lodcrate operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Processing failed with {count} error(s): {first}")]
    Processing { count: usize, first: String },

    #[error("Processing was cancelled")]
    Cancelled,
}

impl Error {
    /// True when the error was produced by a cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias for lodcrate operations
pub type Result<T> = std::result::Result<T, Error>;
