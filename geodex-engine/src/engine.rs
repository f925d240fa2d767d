//! Hybrid index engine: a Tantivy full-text index paired with the
//! registry-managed spatial tree at the same storage location.
//!
//! Text and numeric fields of a [`CatalogEntry`] go into the Tantivy
//! index, geometries go into the spatial tree, and the stored
//! `identifier` field ties the two halves of every record together.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tantivy::collector::TopDocs;
use tantivy::query::AllQuery;
use tantivy::schema::{Field, Schema, Value as TantivyValue, FAST, INDEXED, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use geodex_spatial::{DiskTree, Envelope, IndexRegistry, SpatialTree, StorageConfig};

use crate::cache::{ResultCache, DEFAULT_CACHE_CAPACITY};
use crate::cancel::CancelToken;
use crate::entry::{CatalogEntry, NumericKind, NumericValue};
use crate::errors::{EngineError, EngineResult};
use crate::geometry::Geometry;

/// Stored field holding the domain identifier of each document.
pub const IDENTIFIER_FIELD: &str = "identifier";
/// Tokenized field every text value of an entry is folded into.
pub const ANYTEXT_FIELD: &str = "anytext";
/// Stored bytes field holding the entry's merged geometry as WKB.
pub const GEOMETRY_FIELD: &str = "geometry";
/// Side table recording the declared numeric fields and their type codes.
pub const NUMERIC_FIELDS_FILE: &str = "numeric_fields.properties";

const DEFAULT_WRITER_HEAP_SIZE: usize = 50_000_000;
const DEFAULT_SEARCH_RESULT_LIMIT: usize = 10_000;

/// Configuration for an [`IndexEngine`].
#[derive(Clone)]
pub struct EngineConfig {
    pub(crate) index_dir: PathBuf,
    pub(crate) tree_location: PathBuf,
    pub(crate) owner: String,
    pub(crate) storage: StorageConfig,
    pub(crate) registry: Option<Arc<IndexRegistry>>,
    pub(crate) numeric_fields: Vec<(String, NumericKind)>,
    pub(crate) index_writer_heap_size: usize,
    pub(crate) search_result_limit: usize,
    pub(crate) cache_capacity: usize,
}

impl EngineConfig {
    /// Creates a configuration with default storage, heap size, result
    /// limit and cache capacity.
    pub fn new(
        index_dir: impl Into<PathBuf>,
        tree_location: impl Into<PathBuf>,
        owner: impl Into<String>,
    ) -> EngineConfig {
        EngineConfig {
            index_dir: index_dir.into(),
            tree_location: tree_location.into(),
            owner: owner.into(),
            storage: StorageConfig::default(),
            registry: None,
            numeric_fields: Vec::new(),
            index_writer_heap_size: DEFAULT_WRITER_HEAP_SIZE,
            search_result_limit: DEFAULT_SEARCH_RESULT_LIMIT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Sets the spatial storage backend and CRS.
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Uses a shared registry so several engines over the same tree
    /// location hold one tree handle and count as separate owners. The
    /// registry's own storage config governs the backend. Without this,
    /// the engine creates a private registry from `storage`.
    pub fn with_registry(mut self, registry: Arc<IndexRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Declares a numeric field so it becomes range-queryable.
    pub fn with_numeric_field(mut self, name: impl Into<String>, kind: NumericKind) -> Self {
        self.numeric_fields.push((name.into(), kind));
        self
    }

    /// Sets the Tantivy writer heap size in bytes.
    pub fn with_index_writer_heap_size(mut self, bytes: usize) -> Self {
        self.index_writer_heap_size = bytes;
        self
    }

    /// Sets the maximum number of hits a single search returns.
    pub fn with_search_result_limit(mut self, limit: usize) -> Self {
        self.search_result_limit = limit;
        self
    }

    /// Sets the query result cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn tree_location(&self) -> &Path {
        &self.tree_location
    }
}

/// Resolved Tantivy field handles for the engine schema.
pub(crate) struct EngineFields {
    pub(crate) identifier: Field,
    pub(crate) anytext: Field,
    pub(crate) geometry: Field,
    pub(crate) numerics: HashMap<String, (Field, NumericKind)>,
}

/// The hybrid text + spatial index engine.
pub struct IndexEngine {
    pub(crate) config: EngineConfig,
    pub(crate) registry: Arc<IndexRegistry>,
    pub(crate) tree: RwLock<Arc<DiskTree>>,
    pub(crate) index: Index,
    pub(crate) writer: RwLock<Option<IndexWriter>>,
    pub(crate) reader: IndexReader,
    pub(crate) fields: EngineFields,
    /// (segment ordinal, doc id) to identifier, rebuilt on every refresh.
    pub(crate) doc_identifiers: RwLock<HashMap<(u32, u32), String>>,
    pub(crate) cache: ResultCache,
    pub(crate) text_searches: AtomicUsize,
}

impl IndexEngine {
    /// Opens the engine at the configured locations, creating the Tantivy
    /// index and the spatial tree when they do not exist yet.
    pub fn open(config: EngineConfig) -> EngineResult<IndexEngine> {
        let registry = match &config.registry {
            Some(registry) => registry.clone(),
            None => Arc::new(IndexRegistry::new(config.storage.clone())),
        };
        let tree = registry.acquire(&config.tree_location, &config.owner)?;

        std::fs::create_dir_all(&config.index_dir).map_err(EngineError::setup)?;

        let (index, numeric_fields) = if config.index_dir.join("meta.json").exists() {
            log::debug!("Opening existing index at {:?}", config.index_dir);
            let index = Index::open_in_dir(&config.index_dir).map_err(EngineError::setup)?;
            let declared = load_numeric_fields(&config.index_dir)?
                .unwrap_or_else(|| config.numeric_fields.clone());
            (index, declared)
        } else {
            log::debug!("Creating new index at {:?}", config.index_dir);
            let schema = build_schema(&config.numeric_fields);
            let index =
                Index::create_in_dir(&config.index_dir, schema).map_err(EngineError::setup)?;
            store_numeric_fields(&config.index_dir, &config.numeric_fields)?;
            (index, config.numeric_fields.clone())
        };

        let fields = resolve_fields(&index.schema(), &numeric_fields)?;

        let writer = index
            .writer(config.index_writer_heap_size)
            .map_err(EngineError::setup)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(EngineError::setup)?;

        let engine = IndexEngine {
            cache: ResultCache::new(config.cache_capacity),
            config,
            registry,
            tree: RwLock::new(tree),
            index,
            writer: RwLock::new(Some(writer)),
            reader,
            fields,
            doc_identifiers: RwLock::new(HashMap::new()),
            text_searches: AtomicUsize::new(0),
        };
        engine.refresh()?;
        Ok(engine)
    }

    /// Indexes one entry and commits it. The entry becomes visible to
    /// searches after the next [`refresh`](Self::refresh).
    pub fn index_document(&self, entry: &CatalogEntry) -> EngineResult<()> {
        {
            let mut guard = self.writer.write();
            let writer = guard
                .as_mut()
                .ok_or_else(|| EngineError::setup("index writer closed"))?;
            self.add_entry(writer, entry)?;
            writer.commit().map_err(EngineError::search)?;
        }
        let tree = self.tree.read().clone();
        tree.mapper().flush()?;
        tree.flush()?;
        Ok(())
    }

    /// Rebuilds both halves of the index from scratch.
    ///
    /// The spatial tree is reset before ingest starts. Entries that fail
    /// to index are logged and skipped. When the token is cancelled the
    /// index directory is deleted and the tree reset again, so no partial
    /// state survives; the engine must be reopened afterwards.
    pub fn create_index(
        &self,
        entries: &[CatalogEntry],
        token: &CancelToken,
    ) -> EngineResult<usize> {
        let fresh = self
            .registry
            .reset(&self.config.tree_location, &self.config.owner)?;
        *self.tree.write() = fresh;
        self.cache.clear();

        let mut guard = self.writer.write();
        guard
            .as_mut()
            .ok_or_else(|| EngineError::setup("index writer closed"))?
            .delete_all_documents()
            .map_err(EngineError::search)?;

        let mut indexed = 0;
        for entry in entries {
            if token.is_cancelled() {
                drop(guard.take());
                if let Err(e) = std::fs::remove_dir_all(&self.config.index_dir) {
                    log::warn!(
                        "Failed to remove index directory {:?} after cancellation: {}",
                        self.config.index_dir,
                        e
                    );
                }
                self.registry
                    .reset(&self.config.tree_location, &self.config.owner)?;
                return Err(EngineError::Cancelled);
            }
            let writer = guard
                .as_mut()
                .ok_or_else(|| EngineError::setup("index writer closed"))?;
            match self.add_entry(writer, entry) {
                Ok(()) => indexed += 1,
                Err(e) => log::warn!("Skipping entry {}: {}", entry.identifier, e),
            }
        }
        guard
            .as_mut()
            .ok_or_else(|| EngineError::setup("index writer closed"))?
            .commit()
            .map_err(EngineError::search)?;
        drop(guard);

        let tree = self.tree.read().clone();
        tree.mapper().flush()?;
        tree.flush()?;

        // The live schema is fixed at index creation; describe it, not
        // whatever the current config declares.
        let resolved: Vec<(String, NumericKind)> = self
            .fields
            .numerics
            .iter()
            .map(|(name, (_, kind))| (name.clone(), *kind))
            .collect();
        store_numeric_fields(&self.config.index_dir, &resolved)?;

        self.refresh()?;
        log::debug!("Indexed {} of {} entries", indexed, entries.len());
        Ok(indexed)
    }

    /// Adds one entry to both the text index and the spatial tree,
    /// replacing any previous document with the same identifier. Does not
    /// commit.
    fn add_entry(&self, writer: &mut IndexWriter, entry: &CatalogEntry) -> EngineResult<()> {
        if entry.identifier.is_empty() {
            return Err(EngineError::setup("entry identifier must not be empty"));
        }

        let tree = self.tree.read().clone();
        if let Some(envelope) = crate::geometry::merge_envelope(&entry.identifier, &entry.geometries)
        {
            tree.insert(&envelope)?;
        }

        let mut doc = TantivyDocument::new();
        doc.add_text(self.fields.identifier, &entry.identifier);
        for (_, value) in &entry.text {
            doc.add_text(self.fields.anytext, value);
        }
        for (name, value) in &entry.numerics {
            match self.fields.numerics.get(name) {
                Some((field, kind)) => add_numeric(&mut doc, *field, *kind, value),
                None => log::warn!(
                    "Entry {} carries undeclared numeric field '{}', dropping it",
                    entry.identifier,
                    name
                ),
            }
        }
        if let Some(merged) = entry
            .geometries
            .iter()
            .cloned()
            .reduce(|a, b| Geometry::merge(a, b))
        {
            doc.add_bytes(self.fields.geometry, &merged.to_wkb());
        }

        let id_term = Term::from_field_text(self.fields.identifier, &entry.identifier);
        writer.delete_term(id_term);
        writer.add_document(doc).map_err(EngineError::search)?;
        Ok(())
    }

    /// Removes the document with this identifier from both halves of the
    /// index. Returns whether a spatial record existed for it.
    pub fn remove_document(&self, identifier: &str) -> EngineResult<bool> {
        let tree = self.tree.read().clone();
        let mapper = tree.mapper();

        let probe = Envelope::probe(identifier);
        let removed = match mapper.get_id(&probe)? {
            Some(id) => {
                let envelope = mapper.get_envelope(id)?;
                tree.remove(&envelope)?;
                mapper.set_id(None, id)?;
                mapper.flush()?;
                tree.flush()?;
                true
            }
            None => false,
        };

        let mut guard = self.writer.write();
        let writer = guard
            .as_mut()
            .ok_or_else(|| EngineError::setup("index writer closed"))?;
        writer.delete_term(Term::from_field_text(self.fields.identifier, identifier));
        writer.commit().map_err(EngineError::search)?;
        Ok(removed)
    }

    /// Makes all committed changes visible to searches: reloads the
    /// reader, rebuilds the doc-address to identifier map and clears the
    /// result cache.
    pub fn refresh(&self) -> EngineResult<()> {
        self.reader.reload().map_err(EngineError::search)?;

        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(
                &AllQuery,
                &TopDocs::with_limit(self.config.search_result_limit.max(1)),
            )
            .map_err(EngineError::search)?;

        let mut map = HashMap::with_capacity(top_docs.len());
        for (_, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address).map_err(EngineError::search)?;
            if let Some(identifier) = doc
                .get_first(self.fields.identifier)
                .and_then(|v| v.as_str())
            {
                map.insert((address.segment_ord, address.doc_id), identifier.to_string());
            }
        }
        *self.doc_identifiers.write() = map;
        self.cache.clear();
        Ok(())
    }

    /// Commits pending writes and releases the spatial tree registration.
    /// The engine cannot be used after closing.
    pub fn close(&self) -> EngineResult<()> {
        if let Some(mut writer) = self.writer.write().take() {
            writer.commit().map_err(EngineError::search)?;
        }
        self.registry
            .release(&self.config.tree_location, &self.config.owner)?;
        Ok(())
    }

    /// The configuration this engine was opened with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of Tantivy searches executed so far. Cache hits do not
    /// count, which makes this useful for verifying cache behavior.
    pub fn text_search_count(&self) -> usize {
        self.text_searches.load(Ordering::Relaxed)
    }
}

fn build_schema(numeric_fields: &[(String, NumericKind)]) -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(IDENTIFIER_FIELD, STRING | STORED);
    builder.add_text_field(ANYTEXT_FIELD, TEXT);
    builder.add_bytes_field(GEOMETRY_FIELD, STORED);
    for (name, kind) in numeric_fields {
        if kind.is_floating() {
            builder.add_f64_field(name, INDEXED | STORED | FAST);
        } else {
            builder.add_i64_field(name, INDEXED | STORED | FAST);
        }
    }
    builder.build()
}

fn resolve_fields(
    schema: &Schema,
    numeric_fields: &[(String, NumericKind)],
) -> EngineResult<EngineFields> {
    let mut numerics = HashMap::new();
    for (name, kind) in numeric_fields {
        let field = schema.get_field(name).map_err(EngineError::setup)?;
        numerics.insert(name.clone(), (field, *kind));
    }
    Ok(EngineFields {
        identifier: schema.get_field(IDENTIFIER_FIELD).map_err(EngineError::setup)?,
        anytext: schema.get_field(ANYTEXT_FIELD).map_err(EngineError::setup)?,
        geometry: schema.get_field(GEOMETRY_FIELD).map_err(EngineError::setup)?,
        numerics,
    })
}

fn add_numeric(doc: &mut TantivyDocument, field: Field, kind: NumericKind, value: &NumericValue) {
    if kind.is_floating() {
        let v = match value {
            NumericValue::Double(v) => *v,
            NumericValue::Float(v) => f64::from(*v),
            NumericValue::Int(v) => f64::from(*v),
            NumericValue::Long(v) => *v as f64,
        };
        doc.add_f64(field, v);
    } else {
        let v = match value {
            NumericValue::Double(v) => *v as i64,
            NumericValue::Float(v) => *v as i64,
            NumericValue::Int(v) => i64::from(*v),
            NumericValue::Long(v) => *v,
        };
        doc.add_i64(field, v);
    }
}

/// Writes the numeric field side table as sorted `name=code` lines.
fn store_numeric_fields(
    index_dir: &Path,
    numeric_fields: &[(String, NumericKind)],
) -> EngineResult<()> {
    let mut lines: Vec<String> = numeric_fields
        .iter()
        .map(|(name, kind)| format!("{}={}", name, kind.code()))
        .collect();
    lines.sort();
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    std::fs::write(index_dir.join(NUMERIC_FIELDS_FILE), contents).map_err(EngineError::setup)
}

/// Reads the numeric field side table back. Returns `None` when the file
/// does not exist.
fn load_numeric_fields(index_dir: &Path) -> EngineResult<Option<Vec<(String, NumericKind)>>> {
    let path = index_dir.join(NUMERIC_FIELDS_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(EngineError::setup)?;
    let mut fields = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, code) = line
            .split_once('=')
            .ok_or_else(|| EngineError::setup(format!("malformed numeric field line: {line}")))?;
        let code = code
            .chars()
            .next()
            .and_then(NumericKind::from_code)
            .ok_or_else(|| {
                EngineError::setup(format!("unknown numeric field code in line: {line}"))
            })?;
        fields.push((name.to_string(), code));
    }
    Ok(Some(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SpatialPredicate, SpatialQuery};
    use geodex_spatial::BoundingBox;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> EngineConfig {
        EngineConfig::new(
            dir.path().join("index"),
            dir.path().join("tree"),
            "test-owner",
        )
    }

    fn open_engine(dir: &TempDir) -> IndexEngine {
        IndexEngine::open(test_config(dir)).unwrap()
    }

    #[test]
    fn test_open_creates_index_and_tree() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        assert!(dir.path().join("index").join("meta.json").exists());
        assert!(dir.path().join("tree").exists());
        engine.close().unwrap();
    }

    #[test]
    fn test_index_and_spatial_search() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let entry = CatalogEntry::new("doc1")
            .with_text("title", "first document")
            .with_geometry(Geometry::Polygon(vec![
                crate::geometry::Coordinate::new(0.0, 0.0),
                crate::geometry::Coordinate::new(10.0, 0.0),
                crate::geometry::Coordinate::new(10.0, 10.0),
                crate::geometry::Coordinate::new(0.0, 10.0),
            ]));
        engine.index_document(&entry).unwrap();
        engine.refresh().unwrap();

        let query = SpatialQuery::all()
            .with_spatial(SpatialPredicate::intersects(BoundingBox::new(
                2.0, 2.0, 5.0, 5.0,
            )));
        let results = engine.search(&query).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains("doc1"));

        // A disjoint region finds nothing.
        let query = SpatialQuery::all()
            .with_spatial(SpatialPredicate::intersects(BoundingBox::new(
                50.0, 50.0, 60.0, 60.0,
            )));
        assert!(engine.search(&query).unwrap().is_empty());
        engine.close().unwrap();
    }

    #[test]
    fn test_reindex_replaces_document() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        engine
            .index_document(
                &CatalogEntry::new("doc1")
                    .with_text("title", "alpha")
                    .with_geometry(Geometry::point(1.0, 1.0)),
            )
            .unwrap();
        engine
            .index_document(
                &CatalogEntry::new("doc1")
                    .with_text("title", "beta")
                    .with_geometry(Geometry::point(1.0, 1.0)),
            )
            .unwrap();
        engine.refresh().unwrap();

        assert!(engine.search(&SpatialQuery::text("alpha")).unwrap().is_empty());
        let results = engine.search(&SpatialQuery::text("beta")).unwrap();
        assert_eq!(results.len(), 1);
        engine.close().unwrap();
    }

    #[test]
    fn test_create_index_bulk() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let entries: Vec<CatalogEntry> = (0..5)
            .map(|i| {
                CatalogEntry::new(format!("doc{i}"))
                    .with_text("title", format!("record number {i}"))
                    .with_geometry(Geometry::point(i as f64, i as f64))
            })
            .collect();
        let indexed = engine.create_index(&entries, &CancelToken::new()).unwrap();
        assert_eq!(indexed, 5);

        let results = engine.search(&SpatialQuery::text("record")).unwrap();
        assert_eq!(results.len(), 5);
        engine.close().unwrap();
    }

    #[test]
    fn test_create_index_cancelled_leaves_no_partial_state() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let entries: Vec<CatalogEntry> = (0..3)
            .map(|i| CatalogEntry::new(format!("doc{i}")).with_geometry(Geometry::point(1.0, 1.0)))
            .collect();
        let token = CancelToken::new();
        token.cancel();

        let err = engine.create_index(&entries, &token).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(!dir.path().join("index").exists());

        // The tree was reset, so a fresh engine over the same locations
        // starts empty.
        drop(engine);
        let engine = open_engine(&dir);
        let query = SpatialQuery::all().with_spatial(SpatialPredicate::intersects(
            BoundingBox::new(0.0, 0.0, 100.0, 100.0),
        ));
        assert!(engine.search(&query).unwrap().is_empty());
        engine.close().unwrap();
    }

    #[test]
    fn test_remove_document() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        engine
            .index_document(
                &CatalogEntry::new("doc1")
                    .with_text("title", "ephemeral")
                    .with_geometry(Geometry::point(3.0, 3.0)),
            )
            .unwrap();
        engine.refresh().unwrap();
        assert_eq!(engine.search(&SpatialQuery::text("ephemeral")).unwrap().len(), 1);

        assert!(engine.remove_document("doc1").unwrap());
        engine.refresh().unwrap();

        assert!(engine.search(&SpatialQuery::text("ephemeral")).unwrap().is_empty());
        let query = SpatialQuery::all().with_spatial(SpatialPredicate::intersects(
            BoundingBox::new(0.0, 0.0, 100.0, 100.0),
        ));
        assert!(engine.search(&query).unwrap().is_empty());

        // Removing an unknown identifier reports false.
        assert!(!engine.remove_document("no-such-doc").unwrap());
        engine.close().unwrap();
    }

    #[test]
    fn test_changes_invisible_until_refresh() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        engine
            .index_document(&CatalogEntry::new("doc1").with_text("title", "pending"))
            .unwrap();
        assert!(engine.search(&SpatialQuery::text("pending")).unwrap().is_empty());

        engine.refresh().unwrap();
        assert_eq!(engine.search(&SpatialQuery::text("pending")).unwrap().len(), 1);
        engine.close().unwrap();
    }

    #[test]
    fn test_reopen_preserves_documents() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open_engine(&dir);
            engine
                .index_document(
                    &CatalogEntry::new("doc1")
                        .with_text("title", "durable")
                        .with_geometry(Geometry::point(4.0, 4.0)),
                )
                .unwrap();
            engine.close().unwrap();
        }

        let engine = open_engine(&dir);
        assert_eq!(engine.search(&SpatialQuery::text("durable")).unwrap().len(), 1);
        let query = SpatialQuery::all().with_spatial(SpatialPredicate::intersects(
            BoundingBox::new(3.0, 3.0, 5.0, 5.0),
        ));
        assert_eq!(engine.search(&query).unwrap().len(), 1);
        engine.close().unwrap();
    }

    #[test]
    fn test_shared_registry_shares_tree_handle() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(IndexRegistry::new(StorageConfig::default()));
        let tree_location = dir.path().join("tree");

        let first = IndexEngine::open(
            EngineConfig::new(dir.path().join("index1"), &tree_location, "owner-1")
                .with_registry(registry.clone()),
        )
        .unwrap();
        let second = IndexEngine::open(
            EngineConfig::new(dir.path().join("index2"), &tree_location, "owner-2")
                .with_registry(registry.clone()),
        )
        .unwrap();

        assert_eq!(registry.owner_count(&tree_location), 2);
        let first_tree = first.tree.read().clone();
        let second_tree = second.tree.read().clone();
        assert!(Arc::ptr_eq(&first_tree, &second_tree));

        // A spatial write through one engine is visible through the
        // other's tree handle.
        first
            .index_document(
                &CatalogEntry::new("shared-doc").with_geometry(Geometry::point(2.0, 2.0)),
            )
            .unwrap();
        let hits = second_tree
            .search(&BoundingBox::new(0.0, 0.0, 5.0, 5.0))
            .unwrap();
        assert_eq!(hits.len(), 1);

        first.close().unwrap();
        assert_eq!(registry.owner_count(&tree_location), 1);
        second.close().unwrap();
        assert_eq!(registry.owner_count(&tree_location), 0);
    }

    #[test]
    fn test_numeric_side_table_round_trip() {
        let dir = TempDir::new().unwrap();
        let fields = vec![
            ("area".to_string(), NumericKind::Double),
            ("count".to_string(), NumericKind::Int),
        ];
        store_numeric_fields(dir.path(), &fields).unwrap();

        let contents =
            std::fs::read_to_string(dir.path().join(NUMERIC_FIELDS_FILE)).unwrap();
        assert_eq!(contents, "area=d\ncount=i\n");

        let loaded = load_numeric_fields(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, fields);
    }

    #[test]
    fn test_side_table_tracks_schema_fields_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let config = test_config(&dir).with_numeric_field("area", NumericKind::Double);
            let engine = IndexEngine::open(config).unwrap();
            engine.close().unwrap();
        }

        // Reopening with a different declaration cannot change the
        // schema; a rebuild keeps describing the fields the live schema
        // actually has.
        let config = test_config(&dir).with_numeric_field("phantom", NumericKind::Long);
        let engine = IndexEngine::open(config).unwrap();
        engine
            .create_index(&[CatalogEntry::new("doc1")], &CancelToken::new())
            .unwrap();

        let contents =
            std::fs::read_to_string(dir.path().join("index").join(NUMERIC_FIELDS_FILE)).unwrap();
        assert_eq!(contents, "area=d\n");
        engine.close().unwrap();
    }

    #[test]
    fn test_load_numeric_fields_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(load_numeric_fields(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_undeclared_numeric_field_is_dropped() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        engine
            .index_document(
                &CatalogEntry::new("doc1")
                    .with_text("title", "partial")
                    .with_numeric("undeclared", NumericValue::Int(7)),
            )
            .unwrap();
        engine.refresh().unwrap();
        assert_eq!(engine.search(&SpatialQuery::text("partial")).unwrap().len(), 1);
        engine.close().unwrap();
    }
}
