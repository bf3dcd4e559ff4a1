//! Collection queries.
//!
//! A [`Query`] records its operations in the order they were applied, so a
//! backend can replay them and tests can observe the order.

use crate::backend::Backend;
use crate::directives::{QueryArgs, Template};
use docql_core::{CollectionRef, ComputeScope, DocumentRef, Exports, LinkError, LinkResult};
use serde_json::Value;
use std::fmt;

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Lt,
    Lte,
    Eq,
    NotEq,
    Gte,
    Gt,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOp {
    /// Parses an operator as written in a `where` argument.
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::NotEq),
            ">=" => Some(Self::Gte),
            ">" => Some(Self::Gt),
            "array-contains" => Some(Self::ArrayContains),
            "array-contains-any" => Some(Self::ArrayContainsAny),
            "in" => Some(Self::In),
            "not-in" => Some(Self::NotIn),
            _ => None,
        }
    }

    /// Returns the operator as written.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Gte => ">=",
            Self::Gt => ">",
            Self::ArrayContains => "array-contains",
            Self::ArrayContainsAny => "array-contains-any",
            Self::In => "in",
            Self::NotIn => "not-in",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `field op value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field_path: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field_path: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field_path: field_path.into(),
            op,
            value,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    /// Parses a direction, ignoring case.
    pub fn parse(direction: &str) -> Option<Self> {
        match direction.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// Sort order of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field_path: String,
    pub direction: Direction,
}

/// One step of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOp {
    EndAt(DocumentRef),
    EndBefore(DocumentRef),
    StartAfter(DocumentRef),
    StartAt(DocumentRef),
    Where(Filter),
    OrderBy(OrderBy),
    Limit(usize),
}

/// A query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: CollectionRef,
    ops: Vec<QueryOp>,
}

impl Query {
    /// Creates a query matching every document in `collection`.
    pub fn new(collection: CollectionRef) -> Self {
        Self {
            collection,
            ops: Vec::new(),
        }
    }

    /// Returns the queried collection.
    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    /// Returns the operations in the order they were applied.
    pub fn ops(&self) -> &[QueryOp] {
        &self.ops
    }

    fn push(mut self, op: QueryOp) -> Self {
        self.ops.push(op);
        self
    }

    #[must_use]
    pub fn end_at(self, document: DocumentRef) -> Self {
        self.push(QueryOp::EndAt(document))
    }

    #[must_use]
    pub fn end_before(self, document: DocumentRef) -> Self {
        self.push(QueryOp::EndBefore(document))
    }

    #[must_use]
    pub fn start_after(self, document: DocumentRef) -> Self {
        self.push(QueryOp::StartAfter(document))
    }

    #[must_use]
    pub fn start_at(self, document: DocumentRef) -> Self {
        self.push(QueryOp::StartAt(document))
    }

    #[must_use]
    pub fn filter(self, filter: Filter) -> Self {
        self.push(QueryOp::Where(filter))
    }

    #[must_use]
    pub fn order_by(self, field_path: impl Into<String>, direction: Direction) -> Self {
        self.push(QueryOp::OrderBy(OrderBy {
            field_path: field_path.into(),
            direction,
        }))
    }

    #[must_use]
    pub fn limit(self, limit: usize) -> Self {
        self.push(QueryOp::Limit(limit))
    }
}

/// Builds the query a `@query` or `@ref` directive describes.
///
/// Placeholders are substituted from `exports` first. Operations are then
/// applied in a fixed order: the window cursors (`endAt`, `endBefore`,
/// `startAfter`, `startAt`), the `where` filters, `orderBy`, and `limit`.
/// Arguments that are absent or falsy (`null`, `false`, `0`, `""`) are
/// skipped.
pub fn build_query<B: Backend + ?Sized>(
    client: &B,
    collection: &CollectionRef,
    args: &QueryArgs,
    exports: &Exports,
) -> LinkResult<Query> {
    let scope = ComputeScope {
        reference: collection,
        exports,
    };
    let resolve = |template: &Option<Template>| {
        template
            .as_ref()
            .map(|template| template.resolve(scope))
            .filter(|value| !is_falsy(value))
    };

    let mut query = client.query(collection);

    type Cursor = fn(Query, DocumentRef) -> Query;
    let cursors: [(&str, &Option<Template>, Cursor); 4] = [
        ("endAt", &args.end_at, Query::end_at),
        ("endBefore", &args.end_before, Query::end_before),
        ("startAfter", &args.start_after, Query::start_after),
        ("startAt", &args.start_at, Query::start_at),
    ];
    for (name, template, apply) in cursors {
        if let Some(id) = resolve(template) {
            let id = match id {
                Value::String(id) => id,
                Value::Number(n) => n.to_string(),
                other => return Err(shape_error(name, "a document id", &other)),
            };
            query = apply(query, collection.doc(&id));
        }
    }

    if let Some(filters) = resolve(&args.where_) {
        let Value::Array(filters) = filters else {
            return Err(shape_error("where", "a list of filters", &filters));
        };
        for filter in filters {
            query = query.filter(parse_filter(filter)?);
        }
    }

    if let Some(order) = resolve(&args.order_by) {
        let field_path = order.get("fieldPath").and_then(Value::as_str);
        let direction = match order.get("direction") {
            None | Some(Value::Null) => Some(Direction::Asc),
            Some(Value::String(direction)) => Direction::parse(direction),
            Some(_) => None,
        };
        let (Some(field_path), Some(direction)) = (field_path, direction) else {
            return Err(shape_error(
                "orderBy",
                "{fieldPath, direction: asc|desc}",
                &order,
            ));
        };
        query = query.order_by(field_path, direction);
    }

    if let Some(limit) = resolve(&args.limit) {
        let Some(n) = limit.as_u64().and_then(|n| usize::try_from(n).ok()) else {
            return Err(shape_error("limit", "a non-negative integer", &limit));
        };
        query = query.limit(n);
    }

    Ok(query)
}

fn parse_filter(filter: Value) -> LinkResult<Filter> {
    let field_path = filter.get("fieldPath").and_then(Value::as_str);
    let op = filter.get("op").and_then(Value::as_str).and_then(FilterOp::parse);
    match (field_path, op) {
        (Some(field_path), Some(op)) => Ok(Filter::new(
            field_path,
            op,
            filter.get("val").cloned().unwrap_or(Value::Null),
        )),
        _ => Err(shape_error("where", "{fieldPath, op, val}", &filter)),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn shape_error(arg: &str, expected: &str, got: &Value) -> LinkError {
    LinkError::config(format!("{arg} must be {expected}, got {got}"))
}
