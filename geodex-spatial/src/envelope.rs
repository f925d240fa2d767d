use std::hash::Hash;

/// A 2D bounding box represented by minimum and maximum coordinates.
///
/// `BoundingBox` defines a rectangular area in 2D space using the minimum
/// (min_x, min_y) and maximum (max_x, max_y) corners. Every spatially
/// indexed record carries one, and spatial predicates are expressed as one.
#[derive(Clone, Copy, PartialEq, Default, Debug, serde::Deserialize, serde::Serialize)]
pub struct BoundingBox {
    /// Minimum X coordinate
    pub min_x: f64,
    /// Minimum Y coordinate
    pub min_y: f64,
    /// Maximum X coordinate
    pub max_x: f64,
    /// Maximum Y coordinate
    pub max_y: f64,
}

impl Eq for BoundingBox {}

impl Hash for BoundingBox {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.min_x.to_bits().hash(state);
        self.min_y.to_bits().hash(state);
        self.max_x.to_bits().hash(state);
        self.max_y.to_bits().hash(state);
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoundingBox({}, {}, {}, {})", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

impl BoundingBox {
    /// Creates a new bounding box with the specified coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> BoundingBox {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Checks if this bounding box intersects another bounding box.
    /// Touching edges count as an intersection.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Returns the union of this bounding box with another.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Checks if this bounding box is valid (min <= max).
    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }
}

/// A coordinate reference system code shared by every record at one
/// storage location. Stored once per location.
#[derive(Clone, PartialEq, Eq, Hash, Debug, serde::Deserialize, serde::Serialize)]
pub struct Crs(pub String);

impl Crs {
    /// WGS 84 geographic coordinates, the usual default.
    pub fn wgs84() -> Crs {
        Crs("EPSG:4326".to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One spatially indexed entity.
///
/// When a document binds several geometries, they are folded into a single
/// envelope whose bounds cover them all; `aggregate_count` records how many
/// were merged. Identity for mapper lookups is the identifier alone: an
/// insert with an existing identifier replaces the stored record.
#[derive(Clone, PartialEq, Debug, serde::Deserialize, serde::Serialize)]
pub struct Envelope {
    /// Domain identifier, unique within a storage location.
    pub identifier: String,
    /// Number of sub-envelopes folded into this record.
    pub aggregate_count: u32,
    /// Covering bounds.
    pub bounds: BoundingBox,
}

impl Eq for Envelope {}

impl Hash for Envelope {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
        self.aggregate_count.hash(state);
        self.bounds.hash(state);
    }
}

impl Envelope {
    /// Creates an envelope covering a single bounding box.
    pub fn new(identifier: impl Into<String>, bounds: BoundingBox) -> Envelope {
        Envelope {
            identifier: identifier.into(),
            aggregate_count: 1,
            bounds,
        }
    }

    /// Creates an envelope that aggregates several bounds into one record.
    pub fn aggregated(
        identifier: impl Into<String>,
        bounds: BoundingBox,
        aggregate_count: u32,
    ) -> Envelope {
        Envelope {
            identifier: identifier.into(),
            aggregate_count,
            bounds,
        }
    }

    /// A lookup probe carrying only the identifier. Mapper identity is the
    /// identifier, so probes compare equal to the stored record.
    pub fn probe(identifier: impl Into<String>) -> Envelope {
        Envelope {
            identifier: identifier.into(),
            aggregate_count: 0,
            bounds: BoundingBox::default(),
        }
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Envelope({}, n={}, {})",
            self.identifier, self.aggregate_count, self.bounds
        )
    }
}
