//! Query model.
//!
//! A [`SpatialQuery`] combines free text, an optional spatial predicate,
//! a logical operator, an optional sort, and recursively combined
//! sub-queries. It doubles as the result-cache key, so its equality and
//! hash contract must be stable; floating-point bounds hash by bit
//! pattern (via [`BoundingBox`]).

use geodex_spatial::BoundingBox;

/// Logical operator combining the text and spatial sides of a query.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Sort direction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A sort specification over one stored field.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn ascending(field: impl Into<String>) -> SortSpec {
        SortSpec {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> SortSpec {
        SortSpec {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }
}

/// The spatial predicate of a query: a region the matching records must
/// intersect.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SpatialPredicate {
    pub region: BoundingBox,
}

impl SpatialPredicate {
    pub fn intersects(region: BoundingBox) -> SpatialPredicate {
        SpatialPredicate { region }
    }
}

/// An immutable text + spatial + logical-operator + sub-query composite,
/// used both as a query and as a cache key.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SpatialQuery {
    pub text: Option<String>,
    pub spatial: Option<SpatialPredicate>,
    pub op: LogicalOp,
    pub sort: Option<SortSpec>,
    /// Merged recursively, each under its own operator: And intersects,
    /// Or unions, anything else is rejected.
    pub subqueries: Vec<SpatialQuery>,
}

impl SpatialQuery {
    /// A match-all query (no text, no spatial predicate, AND).
    pub fn all() -> SpatialQuery {
        SpatialQuery {
            text: None,
            spatial: None,
            op: LogicalOp::And,
            sort: None,
            subqueries: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> SpatialQuery {
        SpatialQuery {
            text: Some(text.into()),
            ..SpatialQuery::all()
        }
    }

    /// Builder-style method for chaining.
    pub fn with_spatial(mut self, predicate: SpatialPredicate) -> Self {
        self.spatial = Some(predicate);
        self
    }

    /// Builder-style method for chaining.
    pub fn with_op(mut self, op: LogicalOp) -> Self {
        self.op = op;
        self
    }

    /// Builder-style method for chaining.
    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Builder-style method for chaining.
    pub fn with_subquery(mut self, subquery: SpatialQuery) -> Self {
        self.subqueries.push(subquery);
        self
    }
}
