//! Point-in-time reads returned by a backend.

use crate::query::Query;
use docql_core::DocumentRef;
use indexmap::IndexMap;
use serde_json::Value;

/// The fields of a document.
pub type DocumentData = serde_json::Map<String, Value>;

/// How to read values the server has not confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerTimestamps {
    /// Read pending values as null.
    #[default]
    None,
    /// Read the locally estimated value.
    Estimate,
    /// Read the value from before the pending write.
    Previous,
}

impl ServerTimestamps {
    /// Parses a mode name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "estimate" => Some(Self::Estimate),
            "previous" => Some(Self::Previous),
            _ => None,
        }
    }
}

/// A field value assigned by the server that is still in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingValue {
    /// The locally estimated value.
    pub estimate: Value,
    /// The value before the pending write.
    pub previous: Value,
}

/// A read of a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    reference: DocumentRef,
    data: Option<DocumentData>,
    pending: IndexMap<String, PendingValue>,
    from_cache: bool,
}

impl DocumentSnapshot {
    /// Creates a snapshot of an existing document.
    pub fn new(reference: DocumentRef, data: DocumentData) -> Self {
        Self {
            reference,
            data: Some(data),
            pending: IndexMap::new(),
            from_cache: false,
        }
    }

    /// Creates a snapshot of a document that does not exist.
    pub fn missing(reference: DocumentRef) -> Self {
        Self {
            reference,
            data: None,
            pending: IndexMap::new(),
            from_cache: false,
        }
    }

    /// Marks a field as holding a pending server value.
    #[must_use]
    pub fn with_pending(mut self, field_path: impl Into<String>, value: PendingValue) -> Self {
        self.pending.insert(field_path.into(), value);
        self
    }

    /// Marks the snapshot as served from a local cache.
    #[must_use]
    pub fn from_cache(mut self, from_cache: bool) -> Self {
        self.from_cache = from_cache;
        self
    }

    /// Returns the document id.
    pub fn id(&self) -> &str {
        self.reference.id()
    }

    /// Returns the reference this snapshot was read from.
    pub fn reference(&self) -> &DocumentRef {
        &self.reference
    }

    /// Returns true if the document existed when read.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Returns the document's fields.
    pub fn data(&self) -> Option<&DocumentData> {
        self.data.as_ref()
    }

    /// Returns true if the snapshot was served from a local cache.
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    /// Reads a field. Dotted paths navigate into nested maps.
    ///
    /// Missing fields and missing documents read as null.
    pub fn get(&self, field_path: &str, server_timestamps: ServerTimestamps) -> Value {
        if let Some(pending) = self.pending.get(field_path) {
            return match server_timestamps {
                ServerTimestamps::None => Value::Null,
                ServerTimestamps::Estimate => pending.estimate.clone(),
                ServerTimestamps::Previous => pending.previous.clone(),
            };
        }

        let Some(data) = &self.data else {
            return Value::Null;
        };
        let mut segments = field_path.split('.');
        let mut current = segments.next().and_then(|first| data.get(first));
        for segment in segments {
            current = current.and_then(|value| value.get(segment));
        }
        current.cloned().unwrap_or(Value::Null)
    }
}

/// A read of a collection query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
    query: Query,
    docs: Vec<DocumentSnapshot>,
}

impl QuerySnapshot {
    /// Creates a query snapshot.
    pub fn new(query: Query, docs: Vec<DocumentSnapshot>) -> Self {
        Self { query, docs }
    }

    /// Returns the query this snapshot answers.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Returns the matching documents in query order.
    pub fn docs(&self) -> &[DocumentSnapshot] {
        &self.docs
    }

    /// Consumes the snapshot, returning its documents.
    pub fn into_docs(self) -> Vec<DocumentSnapshot> {
        self.docs
    }

    /// Returns the number of matching documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns true if no document matched.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> DocumentSnapshot {
        let data = json!({"name": "Alice", "address": {"city": "Tokyo"}});
        let Value::Object(data) = data else {
            unreachable!()
        };
        DocumentSnapshot::new(DocumentRef::new("users/alice"), data)
    }

    #[test]
    fn test_get_fields() {
        let snapshot = snapshot();
        assert_eq!(snapshot.id(), "alice");
        assert_eq!(snapshot.get("name", ServerTimestamps::None), json!("Alice"));
        assert_eq!(snapshot.get("address.city", ServerTimestamps::None), json!("Tokyo"));
        assert_eq!(snapshot.get("address.zip", ServerTimestamps::None), Value::Null);
        assert_eq!(snapshot.get("age", ServerTimestamps::None), Value::Null);
    }

    #[test]
    fn test_missing_document_reads_null() {
        let snapshot = DocumentSnapshot::missing(DocumentRef::new("users/bob"));
        assert!(!snapshot.exists());
        assert_eq!(snapshot.id(), "bob");
        assert_eq!(snapshot.get("name", ServerTimestamps::None), Value::Null);
    }

    #[test]
    fn test_pending_server_values() {
        let snapshot = snapshot().with_pending(
            "updatedAt",
            PendingValue {
                estimate: json!(1_700_000_000),
                previous: json!(1_600_000_000),
            },
        );

        assert_eq!(snapshot.get("updatedAt", ServerTimestamps::None), Value::Null);
        assert_eq!(snapshot.get("updatedAt", ServerTimestamps::Estimate), json!(1_700_000_000));
        assert_eq!(snapshot.get("updatedAt", ServerTimestamps::Previous), json!(1_600_000_000));
    }

    #[test]
    fn test_server_timestamps_parse() {
        assert_eq!(ServerTimestamps::parse("ESTIMATE"), Some(ServerTimestamps::Estimate));
        assert_eq!(ServerTimestamps::parse("later"), None);
    }
}
