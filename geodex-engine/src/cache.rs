//! Result cache for spatial queries.
//!
//! Capacity-bounded map from [`SpatialQuery`] to its identifier result
//! set. At capacity the entry evicted is whichever key the map's natural
//! iteration order yields first, not the least recently used one. The
//! whole cache is dropped on every refresh.

use std::collections::HashMap;

use indexmap::IndexSet;
use parking_lot::Mutex;

use crate::query::SpatialQuery;

/// Default maximum number of cached result sets.
pub const DEFAULT_CACHE_CAPACITY: usize = 50;

/// Thread-safe query result cache.
pub struct ResultCache {
    entries: Mutex<HashMap<SpatialQuery, IndexSet<String>>>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(capacity: usize) -> ResultCache {
        ResultCache {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns the cached result set unchanged, if present.
    pub fn get(&self, query: &SpatialQuery) -> Option<IndexSet<String>> {
        self.entries.lock().get(query).cloned()
    }

    /// Inserts a result set, evicting one arbitrary entry first when at
    /// capacity.
    pub fn put(&self, query: SpatialQuery, results: IndexSet<String>) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&query) {
            if let Some(victim) = entries.keys().next().cloned() {
                entries.remove(&victim);
            }
        }
        entries.insert(query, results);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
