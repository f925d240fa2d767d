//! Flat-file element mapper.
//!
//! Two files per storage location:
//!
//! - `elements.bin`: fixed 44-byte records, one slot per tree id:
//!   `[id_offset: u64][aggregate_count: u32][min_x, max_x, min_y, max_y: f64]`,
//!   all big-endian. A deleted slot carries `id_offset == u64::MAX`.
//! - `identifiers.bin`: an 8-byte "current write offset" header slot
//!   (written as -1 until the first close, which lets reopen detect a file
//!   that was never properly closed), a length-prefixed CRS code, then
//!   variable-length entries `[back_pointer: u64][len: u16][identifier utf8]`
//!   at monotonically increasing offsets, referenced by `id_offset`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::envelope::{BoundingBox, Crs, Envelope};
use crate::errors::{SpatialError, SpatialResult};
use crate::mapper::ElementMapper;

/// Primary fixed-record file name.
pub const RECORDS_FILE: &str = "elements.bin";
/// Side id-map file name.
pub const ID_MAP_FILE: &str = "identifiers.bin";

const RECORD_SIZE: u64 = 8 + 4 + 4 * 8;
const DELETED: u64 = u64::MAX;
/// Header value meaning "never properly closed".
const UNCLOSED: i64 = -1;

struct FileState {
    records: File,
    id_map: File,
    /// Next free byte offset in the id-map file.
    write_offset: u64,
    /// Byte length of the id-map header (offset slot + CRS).
    header_len: u64,
}

/// File-backed element mapper.
pub struct FileMapper {
    state: RwLock<Option<FileState>>,
    closed: AtomicBool,
    crs: Crs,
    dir: PathBuf,
}

impl FileMapper {
    /// Creates a fresh mapper at `dir`, truncating any previous data.
    pub fn create(dir: &Path, crs: Crs) -> SpatialResult<Self> {
        std::fs::create_dir_all(dir)?;
        let records = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.join(RECORDS_FILE))?;
        let mut id_map = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.join(ID_MAP_FILE))?;

        // Header: unclosed marker, then the length-prefixed CRS code.
        id_map.write_all(&UNCLOSED.to_be_bytes())?;
        let code = crs.code().as_bytes();
        id_map.write_all(&(code.len() as u32).to_be_bytes())?;
        id_map.write_all(code)?;
        let header_len = 8 + 4 + code.len() as u64;

        log::debug!("Created file mapper at {:?}", dir);
        Ok(Self {
            state: RwLock::new(Some(FileState {
                records,
                id_map,
                write_offset: header_len,
                header_len,
            })),
            closed: AtomicBool::new(false),
            crs,
            dir: dir.to_path_buf(),
        })
    }

    /// Opens an existing mapper at `dir`.
    pub fn open(dir: &Path) -> SpatialResult<Self> {
        let records = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join(RECORDS_FILE))?;
        let mut id_map = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join(ID_MAP_FILE))?;

        let stored_offset = read_i64(&mut id_map)?;
        let crs_len = read_u32(&mut id_map)? as usize;
        let mut code = vec![0u8; crs_len];
        id_map.read_exact(&mut code)?;
        let code = String::from_utf8(code)
            .map_err(|e| SpatialError::Corrupt(format!("invalid CRS code: {}", e)))?;
        let header_len = 8 + 4 + crs_len as u64;

        let write_offset = if stored_offset == UNCLOSED {
            // Never properly closed; the entries themselves are still
            // intact, so the next free offset is the end of the file.
            log::warn!(
                "Id-map file at {:?} was not closed properly, recovering write offset",
                dir
            );
            id_map.seek(SeekFrom::End(0))?
        } else {
            stored_offset as u64
        };

        log::debug!("Opened file mapper at {:?}", dir);
        Ok(Self {
            state: RwLock::new(Some(FileState {
                records,
                id_map,
                write_offset,
                header_len,
            })),
            closed: AtomicBool::new(false),
            crs: Crs(code),
            dir: dir.to_path_buf(),
        })
    }

    /// Whether mapper data exists at `dir`.
    pub fn exists(dir: &Path) -> bool {
        dir.join(RECORDS_FILE).exists() && dir.join(ID_MAP_FILE).exists()
    }

    /// The CRS shared by every record at this location.
    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    fn record_count(state: &mut FileState) -> SpatialResult<u64> {
        Ok(state.records.seek(SeekFrom::End(0))? / RECORD_SIZE)
    }

    fn read_record(state: &mut FileState, id: i64) -> SpatialResult<Option<(u64, u32, BoundingBox)>> {
        if id < 0 || id as u64 >= Self::record_count(state)? {
            return Ok(None);
        }
        state.records.seek(SeekFrom::Start(id as u64 * RECORD_SIZE))?;
        let mut buf = [0u8; RECORD_SIZE as usize];
        state.records.read_exact(&mut buf)?;

        let id_offset = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        if id_offset == DELETED {
            return Ok(None);
        }
        let aggregate_count = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let min_x = f64::from_be_bytes(buf[12..20].try_into().unwrap());
        let max_x = f64::from_be_bytes(buf[20..28].try_into().unwrap());
        let min_y = f64::from_be_bytes(buf[28..36].try_into().unwrap());
        let max_y = f64::from_be_bytes(buf[36..44].try_into().unwrap());
        Ok(Some((
            id_offset,
            aggregate_count,
            BoundingBox::new(min_x, min_y, max_x, max_y),
        )))
    }

    fn write_record(
        state: &mut FileState,
        id: i64,
        id_offset: u64,
        envelope: &Envelope,
    ) -> SpatialResult<()> {
        // Intermediate slots between the current end and `id` get marked
        // deleted so slot addressing stays consistent.
        let count = Self::record_count(state)?;
        for gap in count as i64..id {
            state.records.seek(SeekFrom::Start(gap as u64 * RECORD_SIZE))?;
            let mut gap_buf = [0u8; RECORD_SIZE as usize];
            gap_buf[0..8].copy_from_slice(&DELETED.to_be_bytes());
            state.records.write_all(&gap_buf)?;
        }

        let mut buf = [0u8; RECORD_SIZE as usize];
        buf[0..8].copy_from_slice(&id_offset.to_be_bytes());
        buf[8..12].copy_from_slice(&envelope.aggregate_count.to_be_bytes());
        buf[12..20].copy_from_slice(&envelope.bounds.min_x.to_be_bytes());
        buf[20..28].copy_from_slice(&envelope.bounds.max_x.to_be_bytes());
        buf[28..36].copy_from_slice(&envelope.bounds.min_y.to_be_bytes());
        buf[36..44].copy_from_slice(&envelope.bounds.max_y.to_be_bytes());
        state.records.seek(SeekFrom::Start(id as u64 * RECORD_SIZE))?;
        state.records.write_all(&buf)?;
        Ok(())
    }

    fn read_identifier(state: &mut FileState, id_offset: u64) -> SpatialResult<String> {
        state.id_map.seek(SeekFrom::Start(id_offset))?;
        let mut back = [0u8; 8];
        state.id_map.read_exact(&mut back)?;
        let mut len = [0u8; 2];
        state.id_map.read_exact(&mut len)?;
        let len = u16::from_be_bytes(len) as usize;
        let mut bytes = vec![0u8; len];
        state.id_map.read_exact(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|e| SpatialError::Corrupt(format!("invalid identifier entry: {}", e)))
    }

    /// Appends an identifier entry, returning its byte offset.
    fn append_identifier(
        state: &mut FileState,
        identifier: &str,
        record_offset: u64,
    ) -> SpatialResult<u64> {
        let entry_offset = state.write_offset;
        state.id_map.seek(SeekFrom::Start(entry_offset))?;
        state.id_map.write_all(&record_offset.to_be_bytes())?;
        let bytes = identifier.as_bytes();
        state.id_map.write_all(&(bytes.len() as u16).to_be_bytes())?;
        state.id_map.write_all(bytes)?;
        state.write_offset = entry_offset + 8 + 2 + bytes.len() as u64;
        Ok(entry_offset)
    }

    /// Rewrites the current write offset into the header slot without
    /// disturbing the read/write cursor position.
    fn write_header_offset(state: &mut FileState) -> SpatialResult<()> {
        let pos = state.id_map.stream_position()?;
        state.id_map.seek(SeekFrom::Start(0))?;
        state.id_map.write_all(&(state.write_offset as i64).to_be_bytes())?;
        state.id_map.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut FileState) -> SpatialResult<T>,
    ) -> SpatialResult<T> {
        let mut guard = self.state.write();
        match guard.as_mut() {
            Some(state) => f(state),
            None => Err(SpatialError::Closed),
        }
    }
}

impl ElementMapper for FileMapper {
    fn get_id(&self, envelope: &Envelope) -> SpatialResult<Option<i64>> {
        self.with_state(|state| {
            let count = Self::record_count(state)?;
            for id in 0..count as i64 {
                if let Some((id_offset, _, _)) = Self::read_record(state, id)? {
                    if Self::read_identifier(state, id_offset)? == envelope.identifier {
                        return Ok(Some(id));
                    }
                }
            }
            Ok(None)
        })
    }

    fn set_id(&self, envelope: Option<&Envelope>, id: i64) -> SpatialResult<()> {
        self.with_state(|state| match envelope {
            Some(envelope) => {
                let existing = Self::read_record(state, id)?;
                let id_offset = match existing {
                    Some((offset, _, _))
                        if Self::read_identifier(state, offset)? == envelope.identifier =>
                    {
                        // Update in place, keeping the identifier entry.
                        offset
                    }
                    _ => {
                        let record_offset = id as u64 * RECORD_SIZE;
                        Self::append_identifier(state, &envelope.identifier, record_offset)?
                    }
                };
                Self::write_record(state, id, id_offset, envelope)
            }
            None => {
                if Self::read_record(state, id)?.is_some() {
                    state.records.seek(SeekFrom::Start(id as u64 * RECORD_SIZE))?;
                    state.records.write_all(&DELETED.to_be_bytes())?;
                }
                Ok(())
            }
        })
    }

    fn get_envelope(&self, id: i64) -> SpatialResult<Envelope> {
        self.with_state(|state| {
            let (id_offset, aggregate_count, bounds) = Self::read_record(state, id)?
                .ok_or_else(|| SpatialError::Corrupt(format!("no record for tree id {}", id)))?;
            let identifier = Self::read_identifier(state, id_offset)?;
            Ok(Envelope {
                identifier,
                aggregate_count,
                bounds,
            })
        })
    }

    fn get_all(&self) -> SpatialResult<HashMap<i64, Envelope>> {
        Err(SpatialError::Unsupported(
            "file mapper does not support full dumps",
        ))
    }

    fn clear(&self) -> SpatialResult<()> {
        let crs = self.crs.clone();
        self.with_state(|state| {
            state.records.set_len(0)?;
            state.id_map.set_len(0)?;
            state.id_map.seek(SeekFrom::Start(0))?;
            state.id_map.write_all(&UNCLOSED.to_be_bytes())?;
            let code = crs.code().as_bytes();
            state.id_map.write_all(&(code.len() as u32).to_be_bytes())?;
            state.id_map.write_all(code)?;
            state.write_offset = state.header_len;
            Ok(())
        })
    }

    fn flush(&self) -> SpatialResult<()> {
        self.with_state(|state| {
            Self::write_header_offset(state)?;
            state.records.sync_data()?;
            state.id_map.sync_data()?;
            Ok(())
        })
    }

    fn close(&self) -> SpatialResult<()> {
        let mut guard = self.state.write();
        if let Some(mut state) = guard.take() {
            Self::write_header_offset(&mut state)?;
            state.records.sync_all()?;
            state.id_map.sync_all()?;
            self.closed.store(true, Ordering::SeqCst);
            log::debug!("Closed file mapper at {:?}", self.dir);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn read_i64(file: &mut File) -> SpatialResult<i64> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

fn read_u32(file: &mut File) -> SpatialResult<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}
