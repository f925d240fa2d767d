//! Query execution: text parsing, spatial resolution, logical
//! combination and sorting.
//!
//! Spatial predicates are resolved against the R-tree first and folded
//! into the Tantivy query as a set of identifier terms, so a single
//! searcher pass produces the combined result.

use std::cmp::Ordering as CmpOrdering;
use std::ops::Bound;
use std::sync::atomic::Ordering;

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, RangeQuery, TermSetQuery};
use tantivy::schema::Value as TantivyValue;
use tantivy::{TantivyDocument, Term};

use geodex_spatial::{BoundingBox, SpatialTree};

use crate::engine::IndexEngine;
use crate::errors::{EngineError, EngineResult};
use crate::query::{LogicalOp, SortOrder, SortSpec, SpatialQuery};

/// `field:[low TO high]` range syntax, resolved against declared numeric
/// fields before falling back to the query parser.
static RANGE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+):\[(\S+) TO (\S+)\]$").expect("range pattern"));

impl IndexEngine {
    /// Runs a query and returns the matching identifiers in first-seen
    /// order. Results are served from the cache when the same query was
    /// run since the last refresh.
    pub fn search(&self, query: &SpatialQuery) -> EngineResult<IndexSet<String>> {
        if let Some(hit) = self.cache.get(query) {
            return Ok(hit);
        }

        let mut results = self.execute(query)?;
        for sub in &query.subqueries {
            let sub_results = self.search(sub)?;
            match sub.op {
                LogicalOp::And => results.retain(|id| sub_results.contains(id)),
                LogicalOp::Or => results.extend(sub_results),
                LogicalOp::Not => {
                    return Err(EngineError::search(
                        "NOT is not supported as a sub-query operator",
                    ))
                }
            }
        }

        self.cache.put(query.clone(), results.clone());
        Ok(results)
    }

    /// Executes the text and spatial parts of one query node under its
    /// logical operator.
    fn execute(&self, query: &SpatialQuery) -> EngineResult<IndexSet<String>> {
        let text_query = self.parse_text(query.text.as_deref())?;
        let spatial_query = match &query.spatial {
            Some(predicate) => Some(self.resolve_spatial(&predicate.region)?),
            None => None,
        };
        let sort = query.sort.as_ref();

        match (query.op, spatial_query) {
            (LogicalOp::And, Some(spatial)) => {
                let combined = BooleanQuery::new(vec![
                    (Occur::Must, text_query),
                    (Occur::Must, spatial),
                ]);
                self.run(&combined, sort)
            }
            (LogicalOp::And | LogicalOp::Or, None) => self.run(&*text_query, sort),
            (LogicalOp::Or, Some(spatial)) => {
                let mut results = self.run(&*text_query, sort)?;
                results.extend(self.run(&*spatial, sort)?);
                Ok(results)
            }
            (LogicalOp::Not, spatial) => {
                let mut clauses = vec![(Occur::Must, text_query)];
                if let Some(spatial) = spatial {
                    clauses.push((Occur::Must, spatial));
                }
                let unwanted = self.run(&BooleanQuery::new(clauses), None)?;
                let all = self.run(&AllQuery, sort)?;
                Ok(all.into_iter().filter(|id| !unwanted.contains(id)).collect())
            }
        }
    }

    /// Parses the text part of a query. An absent or empty text matches
    /// everything; a `field:[low TO high]` expression over a declared
    /// numeric field becomes a numeric range query; anything else goes
    /// through the Tantivy query parser over the anytext field.
    fn parse_text(&self, text: Option<&str>) -> EngineResult<Box<dyn Query>> {
        let text = match text {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => return Ok(Box::new(AllQuery)),
        };

        if let Some(captures) = RANGE_PATTERN.captures(text) {
            let name = &captures[1];
            if let Some((field, kind)) = self.fields.numerics.get(name) {
                return if kind.is_floating() {
                    let low = parse_bound::<f64>(&captures[2])?;
                    let high = parse_bound::<f64>(&captures[3])?;
                    Ok(Box::new(RangeQuery::new(
                        Bound::Included(Term::from_field_f64(*field, low)),
                        Bound::Included(Term::from_field_f64(*field, high)),
                    )))
                } else {
                    let low = parse_bound::<i64>(&captures[2])?;
                    let high = parse_bound::<i64>(&captures[3])?;
                    Ok(Box::new(RangeQuery::new(
                        Bound::Included(Term::from_field_i64(*field, low)),
                        Bound::Included(Term::from_field_i64(*field, high)),
                    )))
                };
            }
        }

        let parser = QueryParser::for_index(&self.index, vec![self.fields.anytext]);
        parser.parse_query(text).map_err(EngineError::search)
    }

    /// Resolves a spatial predicate to a term-set query over the
    /// identifiers of every tree entry intersecting the region.
    fn resolve_spatial(&self, region: &BoundingBox) -> EngineResult<Box<dyn Query>> {
        let tree = self.tree.read().clone();
        let mapper = tree.mapper();

        let mut terms = Vec::new();
        for id in tree.search(region)? {
            let envelope = mapper.get_envelope(id)?;
            terms.push(Term::from_field_text(
                self.fields.identifier,
                &envelope.identifier,
            ));
        }
        Ok(Box::new(TermSetQuery::new(terms)))
    }

    /// Executes one Tantivy query and maps the hits back to identifiers,
    /// optionally re-sorting by a stored field.
    fn run(&self, query: &dyn Query, sort: Option<&SortSpec>) -> EngineResult<IndexSet<String>> {
        self.text_searches.fetch_add(1, Ordering::Relaxed);

        let searcher = self.reader.searcher();
        let limit = self.config.search_result_limit.max(1);
        let top_docs = searcher
            .search(query, &TopDocs::with_limit(limit))
            .map_err(EngineError::search)?;

        let doc_identifiers = self.doc_identifiers.read();
        let mut hits = Vec::with_capacity(top_docs.len());
        for (_, address) in top_docs {
            let identifier = match doc_identifiers.get(&(address.segment_ord, address.doc_id)) {
                Some(identifier) => identifier.clone(),
                None => {
                    // Address not covered by the last refresh snapshot.
                    let doc: TantivyDocument =
                        searcher.doc(address).map_err(EngineError::search)?;
                    match doc
                        .get_first(self.fields.identifier)
                        .and_then(|v| v.as_str())
                    {
                        Some(identifier) => identifier.to_string(),
                        None => continue,
                    }
                }
            };
            match sort {
                Some(spec) => {
                    let doc: TantivyDocument =
                        searcher.doc(address).map_err(EngineError::search)?;
                    hits.push((self.sort_key(&doc, spec), identifier));
                }
                None => hits.push((SortKey::Missing, identifier)),
            }
        }
        drop(doc_identifiers);

        if let Some(spec) = sort {
            hits.sort_by(|a, b| {
                let ord = a.0.compare(&b.0);
                match spec.order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            });
        }
        Ok(hits.into_iter().map(|(_, id)| id).collect())
    }

    fn sort_key(&self, doc: &TantivyDocument, spec: &SortSpec) -> SortKey {
        let field = match self.fields.numerics.get(&spec.field) {
            Some((field, _)) => *field,
            None => match self.index.schema().get_field(&spec.field) {
                Ok(field) => field,
                Err(_) => return SortKey::Missing,
            },
        };
        match doc.get_first(field) {
            Some(value) => {
                if let Some(v) = value.as_f64() {
                    SortKey::Numeric(v)
                } else if let Some(v) = value.as_i64() {
                    SortKey::Numeric(v as f64)
                } else if let Some(v) = value.as_str() {
                    SortKey::Text(v.to_string())
                } else {
                    SortKey::Missing
                }
            }
            None => SortKey::Missing,
        }
    }
}

/// Comparable stored field value. Numbers order before text, missing
/// values order last.
enum SortKey {
    Numeric(f64),
    Text(String),
    Missing,
}

impl SortKey {
    fn compare(&self, other: &SortKey) -> CmpOrdering {
        match (self, other) {
            (SortKey::Numeric(a), SortKey::Numeric(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Numeric(_), SortKey::Text(_) | SortKey::Missing) => CmpOrdering::Less,
            (SortKey::Text(_), SortKey::Missing) => CmpOrdering::Less,
            (SortKey::Text(_), SortKey::Numeric(_)) => CmpOrdering::Greater,
            (SortKey::Missing, SortKey::Missing) => CmpOrdering::Equal,
            (SortKey::Missing, _) => CmpOrdering::Greater,
        }
    }
}

fn parse_bound<T: std::str::FromStr>(raw: &str) -> EngineResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| EngineError::search(format!("invalid range bound '{raw}': {e}")))
}
