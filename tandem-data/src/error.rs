//! Error types for dataset loading.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading a dataset from disk.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PLY parsing error: {0}")]
    Ply(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Malformed {format} data at line {line}: {reason}")]
    Malformed {
        format: &'static str,
        line: usize,
        reason: String,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Dataset path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("Dataset contains no samples: {0}")]
    Empty(PathBuf),
}
