//! Shared spatial index registry.
//!
//! A registry owns a table of open trees keyed by storage location and
//! reference-counts the consumers holding each one open. Exactly one live
//! tree handle exists per location; the physical resources are released
//! only when the last owner lets go. The registry is an explicit object
//! with no process-wide static state; multiple independent registries
//! can coexist (tests rely on this).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{BackendKind, StorageConfig};
use crate::errors::{SpatialError, SpatialResult};
use crate::mapper::{file, sql, ElementMapper, FileMapper, SqlMapper};
use crate::tree::{DiskTree, SpatialTree, TREE_FILE};

struct LocationState {
    tree: Arc<DiskTree>,
    owners: Vec<String>,
}

/// Table of open spatial trees, reference-counted by owner.
pub struct IndexRegistry {
    locations: Mutex<HashMap<PathBuf, LocationState>>,
    config: StorageConfig,
}

impl IndexRegistry {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            locations: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Opens or creates the tree at `location` and registers `owner`.
    ///
    /// If an open handle is already cached, `owner` is added to its owner
    /// list (idempotently) and the same handle is returned. Otherwise
    /// persisted data is opened when present, or empty storage is created.
    /// Open failures are raised as typed errors; no handle is registered
    /// on failure.
    pub fn acquire(&self, location: &Path, owner: &str) -> SpatialResult<Arc<DiskTree>> {
        let mut locations = self.locations.lock();

        if let Some(state) = locations.get_mut(location) {
            if !state.tree.is_closed() {
                if !state.owners.iter().any(|o| o == owner) {
                    state.owners.push(owner.to_string());
                }
                log::debug!(
                    "Sharing tree at {:?} with {} ({} owners)",
                    location,
                    owner,
                    state.owners.len()
                );
                return Ok(state.tree.clone());
            }
            // A closed handle in the cache is stale; rebuild it.
            locations.remove(location);
        }

        let tree = self.open_or_create(location)?;
        locations.insert(
            location.to_path_buf(),
            LocationState {
                tree: tree.clone(),
                owners: vec![owner.to_string()],
            },
        );
        Ok(tree)
    }

    /// Removes `owner` from the registration for `location`. The last
    /// owner out physically closes the tree and its element mapper;
    /// earlier releases log and return without closing. Releasing a
    /// location with no registration at all fails with
    /// [`SpatialError::NotManaged`].
    pub fn release(&self, location: &Path, owner: &str) -> SpatialResult<()> {
        let mut locations = self.locations.lock();

        let state = locations
            .get_mut(location)
            .ok_or_else(|| SpatialError::NotManaged(location.display().to_string()))?;

        state.owners.retain(|o| o != owner);
        if !state.owners.is_empty() {
            log::debug!(
                "Not closing tree at {:?}: {} owners remain",
                location,
                state.owners.len()
            );
            return Ok(());
        }

        if let Some(state) = locations.remove(location) {
            // Closing is idempotent; a handle that was already closed
            // elsewhere is a no-op here.
            state.tree.close()?;
            state.tree.mapper().close()?;
            log::debug!("Closed tree at {:?}", location);
        }
        Ok(())
    }

    /// Rebuilds `location` from scratch: releases the registration (if
    /// any), deletes every piece of persisted data, and re-acquires an
    /// empty handle for `owner`.
    pub fn reset(&self, location: &Path, owner: &str) -> SpatialResult<Arc<DiskTree>> {
        match self.release(location, owner) {
            Ok(()) | Err(SpatialError::NotManaged(_)) => {}
            Err(e) => return Err(e),
        }
        {
            let mut locations = self.locations.lock();
            if let Some(state) = locations.remove(location) {
                log::warn!(
                    "Resetting {:?} while {} owners remain",
                    location,
                    state.owners.len()
                );
                state.tree.close()?;
                state.tree.mapper().close()?;
            }
            self.delete_data(location)?;
        }
        self.acquire(location, owner)
    }

    /// Unconditionally deletes all persisted data at `location`,
    /// discarding any cached handle. The caller is responsible for not
    /// calling this on a location still in use.
    pub fn remove(&self, location: &Path) -> SpatialResult<()> {
        let mut locations = self.locations.lock();
        if let Some(state) = locations.remove(location) {
            state.tree.close()?;
            state.tree.mapper().close()?;
        }
        self.delete_data(location)
    }

    /// Number of owners currently registered for `location`.
    pub fn owner_count(&self, location: &Path) -> usize {
        self.locations
            .lock()
            .get(location)
            .map(|state| state.owners.len())
            .unwrap_or(0)
    }

    fn open_or_create(&self, location: &Path) -> SpatialResult<Arc<DiskTree>> {
        let crs = self.config.crs().clone();
        let mapper: Arc<dyn ElementMapper> = match self.config.backend() {
            BackendKind::File => {
                if FileMapper::exists(location) {
                    Arc::new(FileMapper::open(location)?)
                } else {
                    Arc::new(FileMapper::create(location, crs.clone())?)
                }
            }
            BackendKind::EmbeddedSql => Arc::new(SqlMapper::embedded(location, crs.clone())?),
            BackendKind::RemoteSql { datasource } => {
                Arc::new(SqlMapper::remote(datasource, location, crs.clone())?)
            }
        };

        let tree = if DiskTree::exists(location) {
            log::debug!("Opening persisted tree at {:?}", location);
            DiskTree::open(location, mapper)?
        } else {
            log::debug!("Creating empty tree at {:?}", location);
            DiskTree::create(location, mapper, crs)?
        };
        Ok(Arc::new(tree))
    }

    fn delete_data(&self, location: &Path) -> SpatialResult<()> {
        let mut files = vec![
            location.join(TREE_FILE),
            location.join(file::RECORDS_FILE),
            location.join(file::ID_MAP_FILE),
            location.join(sql::EMBEDDED_DB_FILE),
        ];
        if let BackendKind::RemoteSql { datasource } = self.config.backend() {
            if let Some(name) = location.file_name() {
                files.push(datasource.join(format!("{}.sqlite", name.to_string_lossy())));
            }
        }
        for file in files {
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BoundingBox, Envelope};
    use tempfile::tempdir;

    fn file_registry() -> IndexRegistry {
        IndexRegistry::new(StorageConfig::new())
    }

    #[test]
    fn test_acquire_creates_empty_tree() {
        let dir = tempdir().unwrap();
        let registry = file_registry();
        let tree = registry.acquire(dir.path(), "owner-a").unwrap();
        assert!(!tree.is_closed());
        assert!(DiskTree::exists(dir.path()));
        assert_eq!(registry.owner_count(dir.path()), 1);
    }

    #[test]
    fn test_acquire_is_shared() {
        let dir = tempdir().unwrap();
        let registry = file_registry();

        let a = registry.acquire(dir.path(), "owner-a").unwrap();
        let b = registry.acquire(dir.path(), "owner-b").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.owner_count(dir.path()), 2);
    }

    #[test]
    fn test_acquire_same_owner_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = file_registry();

        registry.acquire(dir.path(), "owner-a").unwrap();
        registry.acquire(dir.path(), "owner-a").unwrap();
        assert_eq!(registry.owner_count(dir.path()), 1);
    }

    #[test]
    fn test_release_keeps_tree_open_while_owners_remain() {
        let dir = tempdir().unwrap();
        let registry = file_registry();

        let tree = registry.acquire(dir.path(), "owner-a").unwrap();
        registry.acquire(dir.path(), "owner-b").unwrap();

        registry.release(dir.path(), "owner-a").unwrap();
        assert!(!tree.is_closed());
        assert_eq!(registry.owner_count(dir.path()), 1);

        registry.release(dir.path(), "owner-b").unwrap();
        assert!(tree.is_closed());
        assert!(tree.mapper().is_closed());
    }

    #[test]
    fn test_release_unmanaged_location_fails() {
        let dir = tempdir().unwrap();
        let registry = file_registry();
        assert!(matches!(
            registry.release(dir.path(), "owner-a"),
            Err(SpatialError::NotManaged(_))
        ));
    }

    #[test]
    fn test_double_release_fails() {
        let dir = tempdir().unwrap();
        let registry = file_registry();
        registry.acquire(dir.path(), "owner-a").unwrap();
        registry.release(dir.path(), "owner-a").unwrap();
        assert!(matches!(
            registry.release(dir.path(), "owner-a"),
            Err(SpatialError::NotManaged(_))
        ));
    }

    #[test]
    fn test_acquire_reopens_persisted_data() {
        let dir = tempdir().unwrap();
        let registry = file_registry();

        let tree = registry.acquire(dir.path(), "owner-a").unwrap();
        tree.insert(&Envelope::new("doc1", BoundingBox::new(0.0, 0.0, 10.0, 10.0)))
            .unwrap();
        tree.flush().unwrap();
        registry.release(dir.path(), "owner-a").unwrap();

        let tree = registry.acquire(dir.path(), "owner-b").unwrap();
        let hits = tree.search(&BoundingBox::new(5.0, 5.0, 6.0, 6.0)).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_reset_discards_data() {
        let dir = tempdir().unwrap();
        let registry = file_registry();

        let tree = registry.acquire(dir.path(), "owner-a").unwrap();
        tree.insert(&Envelope::new("doc1", BoundingBox::new(0.0, 0.0, 10.0, 10.0)))
            .unwrap();
        tree.flush().unwrap();

        let fresh = registry.reset(dir.path(), "owner-a").unwrap();
        assert!(fresh
            .search(&BoundingBox::new(0.0, 0.0, 10.0, 10.0))
            .unwrap()
            .is_empty());
        assert_eq!(registry.owner_count(dir.path()), 1);
    }

    #[test]
    fn test_reset_unmanaged_location_succeeds() {
        let dir = tempdir().unwrap();
        let registry = file_registry();
        let tree = registry.reset(dir.path(), "owner-a").unwrap();
        assert!(!tree.is_closed());
    }

    #[test]
    fn test_remove_deletes_everything() {
        let dir = tempdir().unwrap();
        let registry = file_registry();

        registry.acquire(dir.path(), "owner-a").unwrap();
        registry.remove(dir.path()).unwrap();

        assert!(!DiskTree::exists(dir.path()));
        assert!(!FileMapper::exists(dir.path()));
        assert_eq!(registry.owner_count(dir.path()), 0);
    }

    #[test]
    fn test_embedded_sql_backend() {
        let dir = tempdir().unwrap();
        let registry = IndexRegistry::new(StorageConfig::new().with_backend(BackendKind::EmbeddedSql));

        let tree = registry.acquire(dir.path(), "owner-a").unwrap();
        tree.insert(&Envelope::new("doc1", BoundingBox::new(0.0, 0.0, 10.0, 10.0)))
            .unwrap();

        // The SQL backends support full dumps.
        let all = tree.mapper().get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(SqlMapper::exists(dir.path()));
    }

    #[test]
    fn test_remote_sql_backend() {
        let dir = tempdir().unwrap();
        let datasource = tempdir().unwrap();
        let registry = IndexRegistry::new(StorageConfig::new().with_backend(
            BackendKind::RemoteSql {
                datasource: datasource.path().to_path_buf(),
            },
        ));

        let tree = registry.acquire(dir.path(), "owner-a").unwrap();
        tree.insert(&Envelope::new("doc1", BoundingBox::new(0.0, 0.0, 10.0, 10.0)))
            .unwrap();
        registry.release(dir.path(), "owner-a").unwrap();

        // Mapper data lives under the datasource and is removed with the
        // location.
        registry.remove(dir.path()).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(datasource.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "sqlite").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_acquire_after_stale_close_rebuilds_handle() {
        let dir = tempdir().unwrap();
        let registry = file_registry();

        let tree = registry.acquire(dir.path(), "owner-a").unwrap();
        // Closed out-of-band: the cached handle reports closed.
        tree.mapper().close().unwrap();
        tree.close().unwrap();

        let fresh = registry.acquire(dir.path(), "owner-b").unwrap();
        assert!(!fresh.is_closed());
        assert!(!Arc::ptr_eq(&tree, &fresh));
    }

    #[test]
    fn test_independent_registries() {
        let dir1 = tempdir().unwrap();
        let dir2 = tempdir().unwrap();
        let r1 = file_registry();
        let r2 = file_registry();

        r1.acquire(dir1.path(), "owner-a").unwrap();
        r2.acquire(dir2.path(), "owner-a").unwrap();
        assert_eq!(r1.owner_count(dir2.path()), 0);
        assert_eq!(r2.owner_count(dir1.path()), 0);
    }
}
