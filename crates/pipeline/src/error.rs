//! Error types for the acquisition pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the recording file layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File not found or cannot be opened: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Pipeline-specific error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Invalid pipeline configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker thread '{0}' panicked")]
    ThreadPanicked(&'static str),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
