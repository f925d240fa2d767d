//! Catalog entries: the ingest-side document representation.

use crate::geometry::Geometry;

/// The type of a range-queryable numeric field.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NumericKind {
    Double,
    Float,
    Int,
    Long,
}

impl NumericKind {
    /// Single-character type code persisted in the numeric-field side
    /// table: `d`, `f`, `i` or `l`.
    pub fn code(&self) -> char {
        match self {
            NumericKind::Double => 'd',
            NumericKind::Float => 'f',
            NumericKind::Int => 'i',
            NumericKind::Long => 'l',
        }
    }

    pub fn from_code(code: char) -> Option<NumericKind> {
        match code {
            'd' => Some(NumericKind::Double),
            'f' => Some(NumericKind::Float),
            'i' => Some(NumericKind::Int),
            'l' => Some(NumericKind::Long),
            _ => None,
        }
    }

    /// Whether values of this kind index into a floating-point field.
    pub fn is_floating(&self) -> bool {
        matches!(self, NumericKind::Double | NumericKind::Float)
    }
}

/// A numeric field value with its range-query type code.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum NumericValue {
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
}

impl NumericValue {
    pub fn kind(&self) -> NumericKind {
        match self {
            NumericValue::Double(_) => NumericKind::Double,
            NumericValue::Float(_) => NumericKind::Float,
            NumericValue::Int(_) => NumericKind::Int,
            NumericValue::Long(_) => NumericKind::Long,
        }
    }

    /// Single-character type code persisted in the numeric-field side
    /// table: `d`, `f`, `i` or `l`.
    pub fn type_code(&self) -> char {
        self.kind().code()
    }
}

/// One entry to be indexed: a domain identifier, searchable text fields,
/// range-queryable numeric fields, and zero or more bound geometries.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct CatalogEntry {
    pub identifier: String,
    pub text: Vec<(String, String)>,
    pub numerics: Vec<(String, NumericValue)>,
    pub geometries: Vec<Geometry>,
}

impl CatalogEntry {
    pub fn new(identifier: impl Into<String>) -> CatalogEntry {
        CatalogEntry {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Builder-style method for chaining.
    pub fn with_text(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.text.push((field.into(), value.into()));
        self
    }

    /// Builder-style method for chaining.
    pub fn with_numeric(mut self, field: impl Into<String>, value: NumericValue) -> Self {
        self.numerics.push((field.into(), value));
        self
    }

    /// Builder-style method for chaining.
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometries.push(geometry);
        self
    }
}
