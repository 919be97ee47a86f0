//! Error types for I/O operations

use thiserror::Error;

/// Errors that can occur during I/O operations
#[derive(Error, Debug)]
pub enum IoError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid file format: {format}")]
    InvalidFormat { format: String },

    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("Write error: {message}")]
    WriteError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IoError {
    pub fn parse(message: impl Into<String>) -> Self {
        IoError::ParseError {
            message: message.into(),
        }
    }

    pub fn write(message: impl Into<String>) -> Self {
        IoError::WriteError {
            message: message.into(),
        }
    }
}

impl From<IoError> for lodcrate_core::Error {
    fn from(err: IoError) -> Self {
        match err {
            IoError::FileNotFound { path } => lodcrate_core::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {}", path),
            )),
            IoError::InvalidFormat { format } => lodcrate_core::Error::UnsupportedFormat(format),
            IoError::ParseError { message } => lodcrate_core::Error::InvalidData(message),
            IoError::WriteError { message } => lodcrate_core::Error::Io(std::io::Error::other(message)),
            IoError::Io(e) => lodcrate_core::Error::Io(e),
        }
    }
}

impl From<image::ImageError> for IoError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => IoError::Io(e),
            other => IoError::parse(other.to_string()),
        }
    }
}

impl From<bincode::Error> for IoError {
    fn from(err: bincode::Error) -> Self {
        IoError::parse(format!("snapshot: {}", err))
    }
}
