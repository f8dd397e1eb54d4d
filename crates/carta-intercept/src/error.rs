//! Error types for the interception tool

use std::path::PathBuf;

/// Interception Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Interception errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] carta_common::Error),

    #[error("failed to read template {path}: {source}")]
    Template {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}
