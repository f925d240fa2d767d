//! Spatial tree abstraction and its disk-backed implementation.
//!
//! The R-tree structure itself comes from `rstar`; this module wraps it
//! with the storage-location lifecycle (open/closed state, snapshot
//! persistence, element-mapper wiring) that the registry manages.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::envelope::{BoundingBox, Crs, Envelope};
use crate::errors::{SpatialError, SpatialResult};
use crate::mapper::ElementMapper;

/// Snapshot file name inside a storage location.
pub const TREE_FILE: &str = "tree.bin";

/// Represents one open spatial index at a storage location.
pub trait SpatialTree: Send + Sync {
    /// Inserts an envelope, reusing the existing tree id when the mapper
    /// already knows the identifier. Returns the tree id used.
    fn insert(&self, envelope: &Envelope) -> SpatialResult<i64>;

    /// Removes the entry for this envelope's identifier. Returns whether
    /// an entry was removed.
    fn remove(&self, envelope: &Envelope) -> SpatialResult<bool>;

    /// Returns the tree ids of every entry whose bounds intersect the
    /// region.
    fn search(&self, region: &BoundingBox) -> SpatialResult<Vec<i64>>;

    /// Persists the current tree structure.
    fn flush(&self) -> SpatialResult<()>;

    /// Flushes and marks the handle closed. Further operations are
    /// rejected with [`SpatialError::Closed`]. Idempotent.
    fn close(&self) -> SpatialResult<()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;

    /// The CRS shared by every record at this location.
    fn crs(&self) -> Crs;

    /// The element mapper backing this tree.
    fn mapper(&self) -> Arc<dyn ElementMapper>;
}

/// One R-tree leaf: covering bounds plus the tree-internal id the element
/// mapper keys on.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
struct TreeEntry {
    id: i64,
    bounds: BoundingBox,
}

impl RTreeObject for TreeEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners(
            [self.bounds.min_x, self.bounds.min_y],
            [self.bounds.max_x, self.bounds.max_y],
        )
    }
}

/// On-disk form of the whole tree.
#[derive(Serialize, Deserialize)]
struct TreeSnapshot {
    crs: Crs,
    next_id: i64,
    rtree: RTree<TreeEntry>,
}

struct TreeState {
    rtree: RTree<TreeEntry>,
    next_id: i64,
}

/// Disk-backed spatial tree: an `rstar` R-tree persisted as a bincode
/// snapshot at the storage location.
pub struct DiskTree {
    state: RwLock<Option<TreeState>>,
    closed: AtomicBool,
    mapper: Arc<dyn ElementMapper>,
    crs: Crs,
    path: PathBuf,
}

impl DiskTree {
    /// Creates an empty tree at `dir`, persisting an initial snapshot so
    /// the location is recognizable as tree-backed from then on.
    pub fn create(dir: &Path, mapper: Arc<dyn ElementMapper>, crs: Crs) -> SpatialResult<Self> {
        std::fs::create_dir_all(dir)?;
        let tree = Self {
            state: RwLock::new(Some(TreeState {
                rtree: RTree::new(),
                next_id: 0,
            })),
            closed: AtomicBool::new(false),
            mapper,
            crs,
            path: dir.join(TREE_FILE),
        };
        tree.flush()?;
        log::debug!("Created spatial tree at {:?}", tree.path);
        Ok(tree)
    }

    /// Opens the persisted tree at `dir`.
    pub fn open(dir: &Path, mapper: Arc<dyn ElementMapper>) -> SpatialResult<Self> {
        let path = dir.join(TREE_FILE);
        let bytes = std::fs::read(&path)?;
        let snapshot: TreeSnapshot =
            bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())
                .map(|(snapshot, _)| snapshot)
                .map_err(|e| SpatialError::Corrupt(format!("tree snapshot: {}", e)))?;

        log::debug!("Opened spatial tree at {:?}", path);
        Ok(Self {
            state: RwLock::new(Some(TreeState {
                rtree: snapshot.rtree,
                next_id: snapshot.next_id,
            })),
            closed: AtomicBool::new(false),
            mapper,
            crs: snapshot.crs,
            path,
        })
    }

    /// Whether persisted tree data exists at `dir`.
    pub fn exists(dir: &Path) -> bool {
        dir.join(TREE_FILE).exists()
    }

    fn write_snapshot(&self, state: &TreeState) -> SpatialResult<()> {
        let snapshot = TreeSnapshot {
            crs: self.crs.clone(),
            next_id: state.next_id,
            rtree: state.rtree.clone(),
        };
        let bytes = bincode::serde::encode_to_vec(&snapshot, bincode::config::legacy())
            .map_err(|e| SpatialError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl SpatialTree for DiskTree {
    fn insert(&self, envelope: &Envelope) -> SpatialResult<i64> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(SpatialError::Closed)?;

        // Re-insert with the same identifier replaces the previous entry
        // under the same tree id.
        let id = match self.mapper.get_id(envelope)? {
            Some(id) => {
                let old = state.rtree.iter().find(|e| e.id == id).cloned();
                if let Some(old) = old {
                    state.rtree.remove(&old);
                }
                id
            }
            None => {
                let id = state.next_id;
                state.next_id += 1;
                id
            }
        };

        state.rtree.insert(TreeEntry {
            id,
            bounds: envelope.bounds,
        });
        self.mapper.set_id(Some(envelope), id)?;
        Ok(id)
    }

    fn remove(&self, envelope: &Envelope) -> SpatialResult<bool> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(SpatialError::Closed)?;

        let id = match self.mapper.get_id(envelope)? {
            Some(id) => id,
            None => return Ok(false),
        };
        let entry = state.rtree.iter().find(|e| e.id == id).cloned();
        match entry {
            Some(entry) => Ok(state.rtree.remove(&entry).is_some()),
            None => Ok(false),
        }
    }

    fn search(&self, region: &BoundingBox) -> SpatialResult<Vec<i64>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(SpatialError::Closed)?;

        let aabb = AABB::from_corners(
            [region.min_x, region.min_y],
            [region.max_x, region.max_y],
        );
        Ok(state
            .rtree
            .locate_in_envelope_intersecting(&aabb)
            .map(|e| e.id)
            .collect())
    }

    fn flush(&self) -> SpatialResult<()> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(SpatialError::Closed)?;
        self.write_snapshot(state)
    }

    fn close(&self) -> SpatialResult<()> {
        let mut guard = self.state.write();
        if let Some(state) = guard.take() {
            self.write_snapshot(&state)?;
            self.closed.store(true, Ordering::SeqCst);
            log::debug!("Closed spatial tree at {:?}", self.path);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn crs(&self) -> Crs {
        self.crs.clone()
    }

    fn mapper(&self) -> Arc<dyn ElementMapper> {
        self.mapper.clone()
    }
}
