//! # Geodex Engine - Hybrid Text and Spatial Search
//!
//! This crate pairs a Tantivy full-text index with the R-tree registry
//! from `geodex_spatial`, indexing catalog entries into both halves and
//! answering queries that combine free text, numeric ranges and bounding
//! box predicates under AND, OR and NOT.
//!
//! ## Features
//!
//! - **Hybrid Queries**: spatial hits are folded into the text query as
//!   identifier terms, so one searcher pass yields the combined result
//! - **Numeric Ranges**: declared numeric fields answer
//!   `field:[low TO high]` numerically instead of lexicographically
//! - **Manual Refresh**: writes become visible only on `refresh`, which
//!   also drops the query result cache
//! - **Cancellable Rebuilds**: `create_index` honors a [`CancelToken`]
//!   and tears down all partial state when cancelled
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geodex_engine::{
//!     CancelToken, CatalogEntry, EngineConfig, Geometry, IndexEngine, SpatialQuery,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::new("/tmp/catalog/index", "/tmp/catalog/tree", "csw-service");
//! let engine = IndexEngine::open(config)?;
//!
//! let entry = CatalogEntry::new("doc1")
//!     .with_text("title", "coastal survey")
//!     .with_geometry(Geometry::point(4.9, 52.4));
//! engine.create_index(&[entry], &CancelToken::new())?;
//!
//! let hits = engine.search(&SpatialQuery::text("coastal"))?;
//! assert!(hits.contains("doc1"));
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cancel;
pub mod engine;
pub mod entry;
pub mod errors;
pub mod geometry;
pub mod query;
pub mod search;

pub use cache::ResultCache;
pub use cancel::CancelToken;
pub use engine::{EngineConfig, IndexEngine};
pub use entry::{CatalogEntry, NumericKind, NumericValue};
pub use errors::{EngineError, EngineResult};
pub use geometry::{Coordinate, Geometry, GeometryKind};
pub use query::{LogicalOp, SortOrder, SortSpec, SpatialPredicate, SpatialQuery};

pub use geodex_spatial::{IndexRegistry, StorageConfig};
