//! Error and result types for spatial index management.

use std::io;
use thiserror::Error;

/// Errors that can occur in spatial index management operations.
#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt index data: {0}")]
    Corrupt(String),

    #[error("Tree is closed")]
    Closed,

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Location is not managed by this registry: {0}")]
    NotManaged(String),
}

/// Result type for spatial operations.
pub type SpatialResult<T> = Result<T, SpatialError>;
