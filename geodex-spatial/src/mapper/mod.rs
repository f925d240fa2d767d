//! Element-mapper backends.
//!
//! An element mapper persists the association between a tree-internal
//! integer id and a domain [`Envelope`] record. Three backends exist: a
//! flat binary file pair, an embedded SQLite database, and a SQLite
//! database under a process-configured remote datasource path.

use std::collections::HashMap;

use crate::envelope::Envelope;
use crate::errors::SpatialResult;

pub mod file;
pub mod sql;

pub use file::FileMapper;
pub use sql::SqlMapper;

/// Persistence layer mapping tree-internal ids to domain envelope records.
///
/// Identity for lookups is the envelope identifier alone, so a probe
/// envelope built from just an identifier finds the stored record.
pub trait ElementMapper: Send + Sync {
    /// Returns the tree id stored for this envelope's identifier, or
    /// `None` when no record exists.
    fn get_id(&self, envelope: &Envelope) -> SpatialResult<Option<i64>>;

    /// Upserts or deletes the record for `id`.
    ///
    /// With `Some(envelope)` this checks for an existing record first and
    /// updates it in place, else appends/inserts. With `None` the record
    /// for `id` is deleted. The dual-purpose signature is part of the
    /// storage contract and is kept as-is.
    fn set_id(&self, envelope: Option<&Envelope>, id: i64) -> SpatialResult<()>;

    /// Reconstructs the full envelope record for a tree id.
    fn get_envelope(&self, id: i64) -> SpatialResult<Envelope>;

    /// Dumps every stored record. Not every backend supports this; the
    /// file backend returns [`SpatialError::Unsupported`] and callers must
    /// tolerate that.
    ///
    /// [`SpatialError::Unsupported`]: crate::errors::SpatialError::Unsupported
    fn get_all(&self) -> SpatialResult<HashMap<i64, Envelope>>;

    /// Removes every stored record, keeping the mapper open.
    fn clear(&self) -> SpatialResult<()>;

    /// Makes pending writes durable without closing.
    fn flush(&self) -> SpatialResult<()>;

    /// Flushes and releases the underlying resources. Idempotent.
    fn close(&self) -> SpatialResult<()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}
