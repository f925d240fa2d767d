//! # Geodex Spatial - Shared Spatial Index Registry
//!
//! This crate manages persistent R-tree-backed spatial indexes shared
//! across multiple owning consumers, with a pluggable storage backend for
//! the tree's element mapping.
//!
//! ## Features
//!
//! - **Shared Handles**: one live tree handle per storage location,
//!   reference-counted by opaque owner tokens
//! - **Pluggable Mappers**: flat binary file, embedded SQLite, or a
//!   per-location database under a remote datasource path
//! - **Persistent**: tree structure and element mapping survive process
//!   restarts
//! - **Thread Safe**: registry operations are serialized per registry;
//!   trees guard their own mutation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geodex_spatial::{BoundingBox, Envelope, IndexRegistry, SpatialTree, StorageConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = IndexRegistry::new(StorageConfig::new());
//!
//! let tree = registry.acquire(Path::new("/tmp/catalog"), "csw-service")?;
//! tree.insert(&Envelope::new("doc1", BoundingBox::new(0.0, 0.0, 10.0, 10.0)))?;
//! tree.flush()?;
//!
//! let hits = tree.search(&BoundingBox::new(5.0, 5.0, 15.0, 15.0))?;
//! registry.release(Path::new("/tmp/catalog"), "csw-service")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod envelope;
pub mod errors;
pub mod mapper;
pub mod registry;
pub mod tree;

// Re-export core types
pub use config::{BackendKind, StorageConfig};
pub use envelope::{BoundingBox, Crs, Envelope};
pub use errors::{SpatialError, SpatialResult};
pub use mapper::{ElementMapper, FileMapper, SqlMapper};
pub use registry::IndexRegistry;
pub use tree::{DiskTree, SpatialTree};
