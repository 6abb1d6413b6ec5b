//! Query evaluation and find options
//!
//! A query maps a field path (dots descend into objects and arrays) to either
//! a literal or an operator object. Clauses are ANDed; there is no `$or`.
//!
//! Literal semantics:
//! - `null` matches a missing field
//! - a non-array literal matches an array field containing it
//! - otherwise values compare with numeric-tolerant equality

use crate::doc::{Attributes, Doc, LOOKUP};
use crate::error::{DocError, Result};
use crate::predicate::{is_predicate, loose_eq, sort_order, Predicate};
use crate::types::{Class, Ref};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Query object
pub type Query = Attributes;

/// Resolve a dotted path inside a JSON value.
///
/// A top-level key equal to the whole path wins over descending. Numeric
/// segments index arrays; other segments applied to an array collect the
/// matching values of every element.
pub fn get_nested_value<'a>(value: &'a Value, path: &str) -> Option<Cow<'a, Value>> {
    if let Some(direct) = value.as_object().and_then(|map| map.get(path)) {
        return Some(Cow::Borrowed(direct));
    }
    let segments: Vec<&str> = path.split('.').collect();
    resolve(value, &segments)
}

fn resolve<'a>(value: &'a Value, segments: &[&str]) -> Option<Cow<'a, Value>> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(Cow::Borrowed(value));
    };
    match value {
        Value::Object(map) => resolve(map.get(*head)?, rest),
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                return resolve(items.get(index)?, rest);
            }
            let collected: Vec<Value> = items
                .iter()
                .filter_map(|item| resolve(item, segments))
                .map(Cow::into_owned)
                .collect();
            if collected.is_empty() {
                None
            } else {
                Some(Cow::Owned(Value::Array(collected)))
            }
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
enum Clause {
    Eq { path: String, value: Value },
    Predicates { path: String, predicates: Vec<Predicate> },
}

/// A query compiled once and evaluated many times
#[derive(Debug, Clone, Default)]
pub struct CompiledQuery {
    clauses: Vec<Clause>,
}

impl CompiledQuery {
    /// Compile a query object.
    ///
    /// Fails with `UnknownPredicate` / `InvalidPredicate` on bad operators.
    pub fn compile(query: &Query) -> Result<Self> {
        let mut clauses = Vec::with_capacity(query.len());
        for (path, value) in query {
            if path.starts_with('$') {
                return Err(DocError::UnknownPredicate(path.clone()));
            }
            match value {
                Value::Object(map) if is_predicate(map) => clauses.push(Clause::Predicates {
                    path: path.clone(),
                    predicates: Predicate::parse_all(map)?,
                }),
                _ => clauses.push(Clause::Eq {
                    path: path.clone(),
                    value: value.clone(),
                }),
            }
        }
        Ok(CompiledQuery { clauses })
    }

    /// True if the query has no clauses
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate against a JSON document
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq { path, value } => {
                let actual = get_nested_value(doc, path);
                literal_matches(actual.as_deref(), value)
            }
            Clause::Predicates { path, predicates } => {
                let actual = get_nested_value(doc, path);
                predicates.iter().all(|p| p.test(actual.as_deref()))
            }
        })
    }

    /// Evaluate against a document (mixins visible under their class id)
    pub fn matches_doc(&self, doc: &Doc) -> bool {
        self.is_empty() || self.matches(&doc.to_value())
    }
}

fn literal_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(Value::Array(items)), expected) if !expected.is_array() => {
            items.iter().any(|item| loose_eq(item, expected))
        }
        (Some(actual), expected) => loose_eq(actual, expected),
    }
}

/// Compile and evaluate in one step
pub fn matches_query(doc: &Value, query: &Query) -> Result<bool> {
    Ok(CompiledQuery::compile(query)?.matches(doc))
}

/// Accept a raw JSON query, rejecting anything that is not an object
pub fn parse_query(value: &Value) -> Option<Query> {
    value.as_object().cloned()
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortingOrder {
    /// Smallest first; missing values first
    #[serde(rename = "asc")]
    Ascending,
    /// Largest first; missing values last
    #[serde(rename = "desc")]
    Descending,
}

/// Sidecar options of a find request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    /// Sort keys, most significant first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<(String, SortingOrder)>,
    /// Maximum number of documents returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Reference field -> class of the referenced document
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lookup: BTreeMap<String, Ref<Class>>,
    /// Attribute keys to keep; empty keeps everything
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projection: Vec<String>,
    /// Report the match count before `limit`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub total: bool,
}

impl FindOptions {
    /// Add a sort key
    pub fn sort_by(mut self, field: impl Into<String>, order: SortingOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Set the limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Expand a reference field
    pub fn lookup(mut self, field: impl Into<String>, class: Ref<Class>) -> Self {
        self.lookup.insert(field.into(), class);
        self
    }

    /// Keep only the listed attributes
    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Request the total count
    pub fn with_total(mut self) -> Self {
        self.total = true;
        self
    }

    /// Options a single storage domain can honour on its own: sort, limit
    /// and total. Lookup and projection are applied by the caller afterwards.
    pub fn storage_part(&self) -> FindOptions {
        FindOptions {
            sort: self.sort.clone(),
            limit: self.limit,
            lookup: BTreeMap::new(),
            projection: Vec::new(),
            total: self.total,
        }
    }
}

/// Result of a find request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindResult {
    /// Matching documents after sort and limit
    pub docs: Vec<Doc>,
    /// Count before `limit`, when requested
    pub total: Option<usize>,
}

impl FindResult {
    /// Result without documents
    pub fn empty() -> Self {
        FindResult::default()
    }

    /// Number of returned documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// True if nothing was returned
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// First document
    pub fn first(&self) -> Option<&Doc> {
        self.docs.first()
    }

    /// Iterate documents
    pub fn iter(&self) -> std::slice::Iter<'_, Doc> {
        self.docs.iter()
    }

    /// Take the documents
    pub fn into_docs(self) -> Vec<Doc> {
        self.docs
    }
}

impl IntoIterator for FindResult {
    type Item = Doc;
    type IntoIter = std::vec::IntoIter<Doc>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.into_iter()
    }
}

/// Stable multi-key sort
pub fn sort_docs(docs: &mut Vec<Doc>, sort: &[(String, SortingOrder)]) {
    if sort.is_empty() {
        return;
    }
    let mut keyed: Vec<(Vec<Option<Value>>, Doc)> = docs
        .drain(..)
        .map(|doc| {
            let value = doc.to_value();
            let keys = sort
                .iter()
                .map(|(field, _)| get_nested_value(&value, field).map(Cow::into_owned))
                .collect();
            (keys, doc)
        })
        .collect();
    keyed.sort_by(|(a, _), (b, _)| {
        for ((x, y), (_, order)) in a.iter().zip(b).zip(sort) {
            let ordering = match (x, y) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => sort_order(x, y),
            };
            let ordering = match order {
                SortingOrder::Ascending => ordering,
                SortingOrder::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    docs.extend(keyed.into_iter().map(|(_, doc)| doc));
}

/// Sort, count and limit matched documents
pub fn finish_find(mut docs: Vec<Doc>, options: &FindOptions) -> FindResult {
    sort_docs(&mut docs, &options.sort);
    let total = options.total.then_some(docs.len());
    if let Some(limit) = options.limit {
        docs.truncate(limit);
    }
    FindResult { docs, total }
}

/// Expand lookup fields into `$lookup.<field>`.
///
/// `fetch` resolves `(class, id)` to the referenced document; unresolved
/// references become `null`.
pub fn apply_lookup<F>(
    docs: &mut [Doc],
    lookup: &BTreeMap<String, Ref<Class>>,
    mut fetch: F,
) -> Result<()>
where
    F: FnMut(&Ref<Class>, &Ref<Doc>) -> Result<Option<Doc>>,
{
    if lookup.is_empty() {
        return Ok(());
    }
    for doc in docs.iter_mut() {
        let mut expanded = Attributes::new();
        for (field, class) in lookup {
            let target = match doc.get(field) {
                Some(Value::String(id)) => fetch(class, &Ref::new(id.as_str()))?,
                Some(Value::Null) | None => None,
                Some(other) => {
                    return Err(DocError::invalid_input(format!(
                        "lookup field '{field}' is not a reference: {other}"
                    )))
                }
            };
            expanded.insert(
                field.clone(),
                target.map(|d| d.to_value()).unwrap_or(Value::Null),
            );
        }
        doc.attributes.insert(LOOKUP.to_string(), Value::Object(expanded));
    }
    Ok(())
}

/// Drop attributes and mixin bags not named in `projection`.
///
/// Header fields and `$lookup` are always kept.
pub fn apply_projection(docs: &mut [Doc], projection: &[String]) {
    if projection.is_empty() {
        return;
    }
    let keep = |key: &str| key == LOOKUP || projection.iter().any(|p| p == key);
    for doc in docs.iter_mut() {
        doc.attributes.retain(|key, _| keep(key.as_str()));
        doc.mixins.retain(|mixin, _| keep(mixin.as_str()));
    }
}
