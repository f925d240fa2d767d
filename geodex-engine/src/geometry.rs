//! Geometry model for indexed documents.
//!
//! A tagged union over geometry kind, with WKB serialization: geometries
//! are stored as an opaque binary field alongside the text document, and
//! their bounds feed the spatial side of the index.

use geodex_spatial::{BoundingBox, Envelope};

use crate::errors::{EngineError, EngineResult};

/// A 2D coordinate.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Coordinate {
        Coordinate { x, y }
    }
}

/// Geometry kind discriminant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
    Collection,
}

/// A geometry bound to an indexed document.
#[derive(Clone, PartialEq, Debug)]
pub enum Geometry {
    Point(Coordinate),
    Line(Vec<Coordinate>),
    /// Exterior ring only; the first and last coordinate need not repeat.
    Polygon(Vec<Coordinate>),
    Collection(Vec<Geometry>),
}

// WKB geometry type codes.
const WKB_POINT: u32 = 1;
const WKB_LINESTRING: u32 = 2;
const WKB_POLYGON: u32 = 3;
const WKB_COLLECTION: u32 = 7;
const LITTLE_ENDIAN: u8 = 1;

impl Geometry {
    pub fn point(x: f64, y: f64) -> Geometry {
        Geometry::Point(Coordinate::new(x, y))
    }

    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::Line(_) => GeometryKind::Line,
            Geometry::Polygon(_) => GeometryKind::Polygon,
            Geometry::Collection(_) => GeometryKind::Collection,
        }
    }

    /// Covering bounds, or `None` for an empty geometry.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        fn from_coords(coords: &[Coordinate]) -> Option<BoundingBox> {
            let first = coords.first()?;
            let mut bbox = BoundingBox::new(first.x, first.y, first.x, first.y);
            for c in &coords[1..] {
                bbox = bbox.union(&BoundingBox::new(c.x, c.y, c.x, c.y));
            }
            Some(bbox)
        }

        match self {
            Geometry::Point(c) => Some(BoundingBox::new(c.x, c.y, c.x, c.y)),
            Geometry::Line(coords) | Geometry::Polygon(coords) => from_coords(coords),
            Geometry::Collection(parts) => {
                let mut bbox: Option<BoundingBox> = None;
                for part in parts {
                    if let Some(part_bbox) = part.bounding_box() {
                        bbox = Some(match bbox {
                            Some(b) => b.union(&part_bbox),
                            None => part_bbox,
                        });
                    }
                }
                bbox
            }
        }
    }

    /// Combines two geometries, keyed by kind pair: collections absorb
    /// the other operand, anything else promotes to a collection.
    pub fn merge(a: Geometry, b: Geometry) -> Geometry {
        match (a.kind(), b.kind()) {
            (GeometryKind::Collection, GeometryKind::Collection) => {
                let (Geometry::Collection(mut left), Geometry::Collection(right)) = (a, b) else {
                    unreachable!()
                };
                left.extend(right);
                Geometry::Collection(left)
            }
            (GeometryKind::Collection, _) => {
                let Geometry::Collection(mut parts) = a else { unreachable!() };
                parts.push(b);
                Geometry::Collection(parts)
            }
            (_, GeometryKind::Collection) => {
                let Geometry::Collection(mut parts) = b else { unreachable!() };
                parts.insert(0, a);
                Geometry::Collection(parts)
            }
            (_, _) => Geometry::Collection(vec![a, b]),
        }
    }

    /// Serializes to WKB (little-endian, standard type codes).
    pub fn to_wkb(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_wkb(&mut out);
        out
    }

    fn write_wkb(&self, out: &mut Vec<u8>) {
        out.push(LITTLE_ENDIAN);
        match self {
            Geometry::Point(c) => {
                out.extend_from_slice(&WKB_POINT.to_le_bytes());
                out.extend_from_slice(&c.x.to_le_bytes());
                out.extend_from_slice(&c.y.to_le_bytes());
            }
            Geometry::Line(coords) => {
                out.extend_from_slice(&WKB_LINESTRING.to_le_bytes());
                write_coords(out, coords);
            }
            Geometry::Polygon(coords) => {
                out.extend_from_slice(&WKB_POLYGON.to_le_bytes());
                out.extend_from_slice(&1u32.to_le_bytes()); // one ring
                write_coords(out, coords);
            }
            Geometry::Collection(parts) => {
                out.extend_from_slice(&WKB_COLLECTION.to_le_bytes());
                out.extend_from_slice(&(parts.len() as u32).to_le_bytes());
                for part in parts {
                    part.write_wkb(out);
                }
            }
        }
    }

    /// Deserializes from WKB as written by [`Geometry::to_wkb`].
    pub fn from_wkb(bytes: &[u8]) -> EngineResult<Geometry> {
        let mut cursor = WkbCursor { bytes, pos: 0 };
        let geometry = cursor.read_geometry()?;
        Ok(geometry)
    }
}

fn write_coords(out: &mut Vec<u8>, coords: &[Coordinate]) {
    out.extend_from_slice(&(coords.len() as u32).to_le_bytes());
    for c in coords {
        out.extend_from_slice(&c.x.to_le_bytes());
        out.extend_from_slice(&c.y.to_le_bytes());
    }
}

struct WkbCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl WkbCursor<'_> {
    fn take(&mut self, n: usize) -> EngineResult<&[u8]> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(EngineError::setup("truncated WKB geometry"));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> EngineResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> EngineResult<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_coords(&mut self) -> EngineResult<Vec<Coordinate>> {
        let count = self.read_u32()? as usize;
        let mut coords = Vec::with_capacity(count);
        for _ in 0..count {
            let x = self.read_f64()?;
            let y = self.read_f64()?;
            coords.push(Coordinate::new(x, y));
        }
        Ok(coords)
    }

    fn read_geometry(&mut self) -> EngineResult<Geometry> {
        let order = self.take(1)?[0];
        if order != LITTLE_ENDIAN {
            return Err(EngineError::setup("unsupported WKB byte order"));
        }
        match self.read_u32()? {
            WKB_POINT => {
                let x = self.read_f64()?;
                let y = self.read_f64()?;
                Ok(Geometry::point(x, y))
            }
            WKB_LINESTRING => Ok(Geometry::Line(self.read_coords()?)),
            WKB_POLYGON => {
                let rings = self.read_u32()?;
                if rings != 1 {
                    return Err(EngineError::setup("only single-ring polygons are stored"));
                }
                Ok(Geometry::Polygon(self.read_coords()?))
            }
            WKB_COLLECTION => {
                let count = self.read_u32()? as usize;
                let mut parts = Vec::with_capacity(count);
                for _ in 0..count {
                    parts.push(self.read_geometry()?);
                }
                Ok(Geometry::Collection(parts))
            }
            code => Err(EngineError::setup(format!("unknown WKB type code {}", code))),
        }
    }
}

/// Folds a document's geometries into a single envelope record: bounds
/// cover them all, `aggregate_count` records how many were merged.
/// Returns `None` when nothing has bounds.
pub fn merge_envelope(identifier: &str, geometries: &[Geometry]) -> Option<Envelope> {
    let mut bbox: Option<BoundingBox> = None;
    let mut count = 0u32;
    for geometry in geometries {
        if let Some(b) = geometry.bounding_box() {
            count += 1;
            bbox = Some(match bbox {
                Some(existing) => existing.union(&b),
                None => b,
            });
        }
    }
    bbox.map(|bounds| Envelope::aggregated(identifier, bounds, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_bounding_box() {
        let p = Geometry::point(3.0, 4.0);
        assert_eq!(p.bounding_box(), Some(BoundingBox::new(3.0, 4.0, 3.0, 4.0)));
    }

    #[test]
    fn test_line_bounding_box() {
        let line = Geometry::Line(vec![
            Coordinate::new(0.0, 5.0),
            Coordinate::new(10.0, -2.0),
        ]);
        assert_eq!(
            line.bounding_box(),
            Some(BoundingBox::new(0.0, -2.0, 10.0, 5.0))
        );
    }

    #[test]
    fn test_empty_geometry_has_no_bbox() {
        assert_eq!(Geometry::Line(vec![]).bounding_box(), None);
        assert_eq!(Geometry::Collection(vec![]).bounding_box(), None);
    }

    #[test]
    fn test_collection_bbox_covers_parts() {
        let c = Geometry::Collection(vec![
            Geometry::point(0.0, 0.0),
            Geometry::point(10.0, 10.0),
        ]);
        assert_eq!(
            c.bounding_box(),
            Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0))
        );
    }

    #[test]
    fn test_merge_kinds() {
        let merged = Geometry::merge(Geometry::point(0.0, 0.0), Geometry::point(1.0, 1.0));
        assert_eq!(merged.kind(), GeometryKind::Collection);

        let merged = Geometry::merge(merged, Geometry::point(2.0, 2.0));
        let Geometry::Collection(parts) = merged else {
            panic!("expected collection")
        };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_wkb_round_trip_point() {
        let p = Geometry::point(1.5, -2.5);
        assert_eq!(Geometry::from_wkb(&p.to_wkb()).unwrap(), p);
    }

    #[test]
    fn test_wkb_round_trip_collection() {
        let c = Geometry::Collection(vec![
            Geometry::point(0.0, 0.0),
            Geometry::Line(vec![Coordinate::new(1.0, 1.0), Coordinate::new(2.0, 2.0)]),
            Geometry::Polygon(vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(4.0, 0.0),
                Coordinate::new(4.0, 4.0),
                Coordinate::new(0.0, 4.0),
            ]),
        ]);
        assert_eq!(Geometry::from_wkb(&c.to_wkb()).unwrap(), c);
    }

    #[test]
    fn test_wkb_truncated_rejected() {
        let mut bytes = Geometry::point(1.0, 2.0).to_wkb();
        bytes.truncate(bytes.len() - 4);
        assert!(Geometry::from_wkb(&bytes).is_err());
    }

    #[test]
    fn test_merge_envelope_aggregates() {
        let geometries = vec![
            Geometry::point(0.0, 0.0),
            Geometry::point(10.0, 10.0),
            Geometry::Line(vec![]), // no bounds, not counted
        ];
        let envelope = merge_envelope("doc1", &geometries).unwrap();
        assert_eq!(envelope.identifier, "doc1");
        assert_eq!(envelope.aggregate_count, 2);
        assert_eq!(envelope.bounds, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_merge_envelope_empty() {
        assert_eq!(merge_envelope("doc1", &[]), None);
    }
}
