//! Error types for the render-test runner

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while discovering, rendering or persisting tests
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to enumerate the fixture tree
    #[error("Fixture discovery failed: {0}")]
    Discovery(String),

    /// A style document could not be parsed
    #[error("Invalid style document for {test}: {source}")]
    Style {
        test: String,
        #[source]
        source: serde_json::Error,
    },

    /// The snapshotter failed to produce a bitmap
    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    /// Failed to write results to the output tree
    #[error("Cannot write results at {path}: {message}")]
    Output { path: PathBuf, message: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The run (or a single job) was cancelled
    #[error("Render run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn output(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Error::Output {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
