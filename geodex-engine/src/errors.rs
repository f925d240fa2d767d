//! Error and result types for the hybrid search engine.
//!
//! Setup failures and query failures are distinct tiers, so callers can
//! tell "the index is broken" apart from "this one query is malformed".

use geodex_spatial::SpatialError;
use thiserror::Error;

/// Errors that can occur building or querying the hybrid index.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Index-lifecycle failure: the index cannot be created, opened, or
    /// committed. Fatal to the calling operation.
    #[error("Index setup error: {0}")]
    Setup(String),

    /// Per-query failure: malformed query text or an I/O error while
    /// executing one search.
    #[error("Search error: {0}")]
    Search(String),

    /// A bulk build observed its cancellation token; the partial index
    /// has been deleted.
    #[error("Index build cancelled")]
    Cancelled,

    #[error("Spatial index error: {0}")]
    Spatial(#[from] SpatialError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Wraps an index-lifecycle failure.
    pub fn setup(err: impl std::fmt::Display) -> Self {
        EngineError::Setup(err.to_string())
    }

    /// Wraps a per-query failure.
    pub fn search(err: impl std::fmt::Display) -> Self {
        EngineError::Search(err.to_string())
    }
}
