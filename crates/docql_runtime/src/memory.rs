//! An in-memory document store.
//!
//! `MemoryBackend` implements the whole [`Backend`] contract: reads, queries
//! with cursors, filters, ordering and limits, writes with merge semantics,
//! and live listeners that fire on every write touching their target.

use crate::backend::{Backend, ListenTarget, ListenerRegistration, SetOptions, SnapshotSink, Source};
use crate::query::{Direction, Filter, FilterOp, Query, QueryOp};
use crate::snapshot::{DocumentData, DocumentSnapshot, PendingValue, QuerySnapshot};
use async_trait::async_trait;
use docql_core::{BackendError, CollectionRef, DocumentRef, ResourcePath};
use indexmap::IndexMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tracing::debug;

type Collection = BTreeMap<String, DocumentData>;

struct Listener {
    id: u64,
    target: ListenTarget,
    sink: SnapshotSink,
}

/// A document store held in memory.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<ResourcePath, Collection>>,
    pending: Mutex<HashMap<ResourcePath, IndexMap<String, PendingValue>>>,
    listeners: Arc<Mutex<Vec<Listener>>>,
    failures: Mutex<VecDeque<BackendError>>,
    next_doc_id: AtomicU64,
    next_listener_id: AtomicU64,
    detached: Arc<AtomicUsize>,
}

impl MemoryBackend {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `seed`.
    ///
    /// The seed maps collection paths to documents keyed by id:
    /// `{"users": {"u1": {"name": "Alice"}}, "users/u1/posts": {...}}`.
    pub fn with_seed(seed: &Value) -> Result<Self, BackendError> {
        let Value::Object(collections) = seed else {
            return Err(BackendError::invalid_argument(
                "seed must map collection paths to documents",
            ));
        };

        let mut store = HashMap::new();
        for (path, documents) in collections {
            let Value::Object(documents) = documents else {
                return Err(BackendError::invalid_argument(format!(
                    "seed collection `{path}` must map document ids to objects"
                )));
            };
            let mut collection = Collection::new();
            for (id, data) in documents {
                let Value::Object(data) = data else {
                    return Err(BackendError::invalid_argument(format!(
                        "seed document `{path}/{id}` must be an object"
                    )));
                };
                collection.insert(id.clone(), data.clone());
            }
            store.insert(ResourcePath::parse(path), collection);
        }

        Ok(Self {
            collections: RwLock::new(store),
            ..Self::default()
        })
    }

    /// Makes the next store call fail with `error`.
    pub fn fail_next(&self, error: BackendError) {
        lock(&self.failures).push_back(error);
    }

    /// Marks a field of a document as holding a pending server value.
    pub fn set_pending(
        &self,
        document: &DocumentRef,
        field_path: impl Into<String>,
        value: PendingValue,
    ) {
        lock(&self.pending)
            .entry(document.path().clone())
            .or_default()
            .insert(field_path.into(), value);
    }

    /// Sends `error` to every attached listener.
    pub fn fail_listeners(&self, error: &BackendError) {
        for listener in lock(&self.listeners).iter() {
            let _ = listener.sink.send(Err(error.clone()));
        }
    }

    /// Returns the number of attached listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Returns how many listeners have been detached so far.
    pub fn detach_count(&self) -> usize {
        self.detached.load(AtomicOrdering::SeqCst)
    }

    fn take_failure(&self) -> Result<(), BackendError> {
        match lock(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn generate_id(&self) -> String {
        let n = self.next_doc_id.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        format!("{n:020}")
    }

    fn snapshot(
        &self,
        document: DocumentRef,
        data: Option<DocumentData>,
        source: Source,
    ) -> DocumentSnapshot {
        let pending = lock(&self.pending).get(document.path()).cloned();
        let mut snapshot = match data {
            Some(data) => DocumentSnapshot::new(document, data),
            None => DocumentSnapshot::missing(document),
        };
        for (field_path, value) in pending.into_iter().flatten() {
            snapshot = snapshot.with_pending(field_path, value);
        }
        snapshot.from_cache(source == Source::Cache)
    }

    fn notify(&self, document: &DocumentRef) {
        for listener in lock(&self.listeners).iter() {
            if listener.target.is_affected_by(document) {
                debug!(listener = listener.id, target = %listener.target, "notifying listener");
                let _ = listener.sink.send(Ok(listener.target.clone()));
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_document(
        &self,
        document: &DocumentRef,
        source: Source,
    ) -> Result<DocumentSnapshot, BackendError> {
        self.take_failure()?;
        let data = {
            let collections = self.collections.read().await;
            collections
                .get(document.parent().path())
                .and_then(|collection| collection.get(document.id()))
                .cloned()
        };
        Ok(self.snapshot(document.clone(), data, source))
    }

    async fn get_query(
        &self,
        query: &Query,
        source: Source,
    ) -> Result<QuerySnapshot, BackendError> {
        self.take_failure()?;
        let matches = {
            let collections = self.collections.read().await;
            let empty = Collection::new();
            let collection = collections
                .get(query.collection().path())
                .unwrap_or(&empty);
            run_query(collection, query)?
        };

        let docs = matches
            .into_iter()
            .map(|(id, data)| self.snapshot(query.collection().doc(&id), Some(data), source))
            .collect();
        Ok(QuerySnapshot::new(query.clone(), docs))
    }

    async fn add(
        &self,
        collection: &CollectionRef,
        data: DocumentData,
    ) -> Result<DocumentRef, BackendError> {
        self.take_failure()?;
        let id = self.generate_id();
        let document = collection.doc(&id);
        self.collections
            .write()
            .await
            .entry(collection.path().clone())
            .or_default()
            .insert(id, data);

        debug!(document = %document, "added document");
        self.notify(&document);
        Ok(document)
    }

    async fn set(
        &self,
        document: &DocumentRef,
        data: DocumentData,
        options: &SetOptions,
    ) -> Result<(), BackendError> {
        self.take_failure()?;
        {
            let mut collections = self.collections.write().await;
            let existing = collections
                .entry(document.parent().path().clone())
                .or_default()
                .entry(document.id().to_string())
                .or_default();

            match &options.merge_fields {
                Some(fields) => {
                    for field_path in fields {
                        match get_path(&data, field_path) {
                            Some(value) => set_path(existing, field_path, value.clone()),
                            None => {
                                return Err(BackendError::invalid_argument(format!(
                                    "field `{field_path}` is listed in mergeFields but missing from the data"
                                )))
                            }
                        }
                    }
                }
                None if options.merge => deep_merge(existing, data),
                None => *existing = data,
            }
        }

        debug!(document = %document, merge = options.merge, "set document");
        self.notify(document);
        Ok(())
    }

    async fn update(
        &self,
        document: &DocumentRef,
        data: DocumentData,
    ) -> Result<(), BackendError> {
        self.take_failure()?;
        {
            let mut collections = self.collections.write().await;
            let Some(existing) = collections
                .get_mut(document.parent().path())
                .and_then(|collection| collection.get_mut(document.id()))
            else {
                return Err(BackendError::not_found(format!(
                    "no document to update: {document}"
                )));
            };
            for (field_path, value) in data {
                set_path(existing, &field_path, value);
            }
        }

        debug!(document = %document, "updated document");
        self.notify(document);
        Ok(())
    }

    async fn delete(&self, document: &DocumentRef) -> Result<(), BackendError> {
        self.take_failure()?;
        let removed = self
            .collections
            .write()
            .await
            .get_mut(document.parent().path())
            .and_then(|collection| collection.remove(document.id()))
            .is_some();

        if removed {
            debug!(document = %document, "deleted document");
            self.notify(document);
        }
        Ok(())
    }

    fn listen(
        &self,
        target: ListenTarget,
        sink: SnapshotSink,
    ) -> Result<ListenerRegistration, BackendError> {
        self.take_failure()?;
        let id = self.next_listener_id.fetch_add(1, AtomicOrdering::SeqCst);
        debug!(listener = id, target = %target, "attaching listener");
        lock(&self.listeners).push(Listener { id, target, sink });

        let listeners = Arc::clone(&self.listeners);
        let detached = Arc::clone(&self.detached);
        Ok(ListenerRegistration::new(move || {
            lock(&listeners).retain(|listener| listener.id != id);
            detached.fetch_add(1, AtomicOrdering::SeqCst);
        }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Query evaluation
// =============================================================================

fn run_query(
    collection: &Collection,
    query: &Query,
) -> Result<Vec<(String, DocumentData)>, BackendError> {
    let mut filters = Vec::new();
    let mut order = None;
    let mut cursors = Vec::new();
    let mut limit = None;
    for op in query.ops() {
        match op {
            QueryOp::Where(filter) => filters.push(filter),
            QueryOp::OrderBy(order_by) => order = Some(order_by),
            QueryOp::Limit(n) => limit = Some(*n),
            cursor => cursors.push(cursor),
        }
    }

    let sort_key = |data: &DocumentData| -> Value {
        order
            .map(|order| get_path(data, &order.field_path).cloned().unwrap_or(Value::Null))
            .unwrap_or(Value::Null)
    };
    let descending = order.is_some_and(|order| order.direction == Direction::Desc);
    let compare = |a: (&Value, &str), b: (&Value, &str)| {
        let ordering = compare_values(a.0, b.0).then_with(|| a.1.cmp(b.1));
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    };

    let mut matches: Vec<(String, DocumentData)> = collection
        .iter()
        .filter(|(_, data)| filters.iter().all(|filter| matches_filter(data, filter)))
        .filter(|(_, data)| {
            order.map_or(true, |order| get_path(data, &order.field_path).is_some())
        })
        .map(|(id, data)| (id.clone(), data.clone()))
        .collect();
    matches.sort_by(|(a_id, a), (b_id, b)| {
        compare((&sort_key(a), a_id.as_str()), (&sort_key(b), b_id.as_str()))
    });

    for cursor in cursors {
        let (QueryOp::EndAt(document)
        | QueryOp::EndBefore(document)
        | QueryOp::StartAfter(document)
        | QueryOp::StartAt(document)) = cursor
        else {
            continue;
        };
        let Some(cursor_data) = collection.get(document.id()) else {
            return Err(BackendError::invalid_argument(format!(
                "cursor document does not exist: {document}"
            )));
        };
        let cursor_key = sort_key(cursor_data);
        let cursor_id = document.id();
        matches.retain(|(id, data)| {
            let ordering = compare((&sort_key(data), id.as_str()), (&cursor_key, cursor_id));
            match cursor {
                QueryOp::StartAt(_) => ordering != Ordering::Less,
                QueryOp::StartAfter(_) => ordering == Ordering::Greater,
                QueryOp::EndAt(_) => ordering != Ordering::Greater,
                _ => ordering == Ordering::Less,
            }
        });
    }

    if let Some(limit) = limit {
        matches.truncate(limit);
    }
    Ok(matches)
}

fn matches_filter(data: &DocumentData, filter: &Filter) -> bool {
    let Some(field) = get_path(data, &filter.field_path) else {
        return false;
    };
    let expected = &filter.value;
    let same_type = type_rank(field) == type_rank(expected);
    let ordering = compare_values(field, expected);

    match filter.op {
        FilterOp::Eq => ordering == Ordering::Equal,
        FilterOp::NotEq => !field.is_null() && ordering != Ordering::Equal,
        FilterOp::Lt => same_type && ordering == Ordering::Less,
        FilterOp::Lte => same_type && ordering != Ordering::Greater,
        FilterOp::Gt => same_type && ordering == Ordering::Greater,
        FilterOp::Gte => same_type && ordering != Ordering::Less,
        FilterOp::ArrayContains => field
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(item, expected))),
        FilterOp::ArrayContainsAny => match (field.as_array(), expected.as_array()) {
            (Some(items), Some(candidates)) => items
                .iter()
                .any(|item| candidates.iter().any(|c| values_equal(item, c))),
            _ => false,
        },
        FilterOp::In => expected
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|c| values_equal(field, c))),
        FilterOp::NotIn => {
            !field.is_null()
                && expected
                    .as_array()
                    .is_some_and(|candidates| !candidates.iter().any(|c| values_equal(field, c)))
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Orders values the way the store sorts them: by type first, then by value.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b)
            .map(|(a, b)| compare_values(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Value::Object(a), Value::Object(b)) => {
            let (a, b) = (Value::Object(a.clone()), Value::Object(b.clone()));
            a.to_string().cmp(&b.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

fn get_path<'a>(data: &'a DocumentData, field_path: &str) -> Option<&'a Value> {
    let mut segments = field_path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

fn set_path(data: &mut DocumentData, field_path: &str, value: Value) {
    match field_path.split_once('.') {
        None => {
            data.insert(field_path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = data
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(DocumentData::new()));
            if !child.is_object() {
                *child = Value::Object(DocumentData::new());
            }
            if let Value::Object(child) = child {
                set_path(child, rest, value);
            }
        }
    }
}

fn deep_merge(existing: &mut DocumentData, data: DocumentData) {
    for (key, value) in data {
        match (existing.get_mut(&key), value) {
            (Some(Value::Object(current)), Value::Object(incoming)) => {
                deep_merge(current, incoming);
            }
            (_, value) => {
                existing.insert(key, value);
            }
        }
    }
}
