//! SQL element mapper.
//!
//! One row per envelope in a `records` table, created on first use. The
//! embedded variant keeps its database file inside the storage location;
//! the remote variant keeps one database per location under a
//! process-configured datasource path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::envelope::{BoundingBox, Crs, Envelope};
use crate::errors::{SpatialError, SpatialResult};
use crate::mapper::ElementMapper;

/// Database file name used by the embedded variant.
pub const EMBEDDED_DB_FILE: &str = "records.sqlite";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records(
    id INTEGER PRIMARY KEY,
    identifier TEXT,
    nbenv INTEGER,
    minx DOUBLE,
    maxx DOUBLE,
    miny DOUBLE,
    maxy DOUBLE
);
CREATE TABLE IF NOT EXISTS crs(code TEXT);
";

/// SQL-backed element mapper.
pub struct SqlMapper {
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
    crs: Crs,
    db_path: PathBuf,
}

impl SqlMapper {
    /// Opens (creating schema if absent) the embedded database inside the
    /// storage location directory.
    pub fn embedded(dir: &Path, crs: Crs) -> SpatialResult<Self> {
        std::fs::create_dir_all(dir)?;
        Self::open_db(dir.join(EMBEDDED_DB_FILE), crs)
    }

    /// Opens (creating schema if absent) a per-location database under the
    /// configured remote datasource path.
    pub fn remote(datasource: &Path, location: &Path, crs: Crs) -> SpatialResult<Self> {
        std::fs::create_dir_all(datasource)?;
        let name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string());
        Self::open_db(datasource.join(format!("{}.sqlite", name)), crs)
    }

    /// Whether an embedded database already exists at `dir`.
    pub fn exists(dir: &Path) -> bool {
        dir.join(EMBEDDED_DB_FILE).exists()
    }

    fn open_db(db_path: PathBuf, crs: Crs) -> SpatialResult<Self> {
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(SCHEMA)?;

        // The CRS is shared by the whole location, stored once.
        let stored: Option<String> = conn
            .query_row("SELECT code FROM crs", [], |row| row.get(0))
            .optional()?;
        let crs = match stored {
            Some(code) => Crs(code),
            None => {
                conn.execute("INSERT INTO crs(code) VALUES (?1)", params![crs.code()])?;
                crs
            }
        };

        log::debug!("Opened SQL mapper at {:?}", db_path);
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
            crs,
            db_path,
        })
    }

    /// The CRS shared by every record at this location.
    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SpatialResult<T>) -> SpatialResult<T> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(SpatialError::Closed),
        }
    }
}

impl ElementMapper for SqlMapper {
    fn get_id(&self, envelope: &Envelope) -> SpatialResult<Option<i64>> {
        self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT id FROM records WHERE identifier = ?1",
                    params![envelope.identifier],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
    }

    /// Existence check first, then UPDATE or INSERT. The two-step is not
    /// atomic: concurrent writers targeting the same identifier can race.
    /// Known hazard of this storage contract; callers serialize writes per
    /// location.
    fn set_id(&self, envelope: Option<&Envelope>, id: i64) -> SpatialResult<()> {
        self.with_conn(|conn| match envelope {
            Some(envelope) => {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM records WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let b = &envelope.bounds;
                if exists.is_some() {
                    conn.execute(
                        "UPDATE records SET identifier = ?1, nbenv = ?2, \
                         minx = ?3, maxx = ?4, miny = ?5, maxy = ?6 WHERE id = ?7",
                        params![
                            envelope.identifier,
                            envelope.aggregate_count,
                            b.min_x,
                            b.max_x,
                            b.min_y,
                            b.max_y,
                            id
                        ],
                    )?;
                } else {
                    conn.execute(
                        "INSERT INTO records(id, identifier, nbenv, minx, maxx, miny, maxy) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            id,
                            envelope.identifier,
                            envelope.aggregate_count,
                            b.min_x,
                            b.max_x,
                            b.min_y,
                            b.max_y
                        ],
                    )?;
                }
                Ok(())
            }
            None => {
                conn.execute("DELETE FROM records WHERE id = ?1", params![id])?;
                Ok(())
            }
        })
    }

    fn get_envelope(&self, id: i64) -> SpatialResult<Envelope> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT identifier, nbenv, minx, maxx, miny, maxy FROM records WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Envelope {
                        identifier: row.get(0)?,
                        aggregate_count: row.get(1)?,
                        bounds: BoundingBox::new(
                            row.get(2)?,
                            row.get(4)?,
                            row.get(3)?,
                            row.get(5)?,
                        ),
                    })
                },
            )
            .optional()?
            .ok_or_else(|| SpatialError::Corrupt(format!("no record for tree id {}", id)))
        })
    }

    fn get_all(&self) -> SpatialResult<HashMap<i64, Envelope>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, identifier, nbenv, minx, maxx, miny, maxy FROM records",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    Envelope {
                        identifier: row.get(1)?,
                        aggregate_count: row.get(2)?,
                        bounds: BoundingBox::new(
                            row.get(3)?,
                            row.get(5)?,
                            row.get(4)?,
                            row.get(6)?,
                        ),
                    },
                ))
            })?;

            let mut all = HashMap::new();
            for row in rows {
                let (id, envelope) = row?;
                all.insert(id, envelope);
            }
            Ok(all)
        })
    }

    fn clear(&self) -> SpatialResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM records", [])?;
            Ok(())
        })
    }

    fn flush(&self) -> SpatialResult<()> {
        // The connection autocommits; every write is already durable.
        self.with_conn(|_conn| Ok(()))
    }

    fn close(&self) -> SpatialResult<()> {
        let mut guard = self.conn.lock();
        if guard.take().is_some() {
            self.closed.store(true, Ordering::SeqCst);
            log::debug!("Closed SQL mapper at {:?}", self.db_path);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
