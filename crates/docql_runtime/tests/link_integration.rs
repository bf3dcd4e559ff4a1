//! Integration tests for the document link.

use async_trait::async_trait;
use docql_core::{
    BackendError, BackendErrorCode, CollectionRef, DocumentRef, LinkError, Operation,
};
use docql_runtime::{
    Backend, DocumentData, DocumentLink, DocumentSnapshot, LinkConfig, ListenTarget,
    ListenerRegistration, MemoryBackend, NextLink, Query, QuerySnapshot, Response, ResultStream,
    SetOptions, SnapshotSink, Source,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn operation(value: Value) -> Operation {
    serde_json::from_value(value).unwrap()
}

fn seeded() -> Arc<MemoryBackend> {
    Arc::new(
        MemoryBackend::with_seed(&json!({
            "users": {
                "u1": {"name": "Alice", "age": 30},
                "u2": {"name": "Bob", "age": 17}
            },
            "settings": {
                "limits": {"minAge": 21}
            }
        }))
        .unwrap(),
    )
}

async fn wait_for_listeners(backend: &MemoryBackend, count: usize) {
    while backend.listener_count() < count {
        tokio::task::yield_now().await;
    }
}

struct EchoLink;

impl NextLink for EchoLink {
    fn request(&self, operation: Operation) -> ResultStream {
        let name = operation.name.unwrap_or_default();
        ResultStream::from_results(vec![Ok(Response::new(json!({"echo": name})))])
    }
}

/// Delays reads of one document and records the order reads finish in.
struct SlowDocumentBackend {
    inner: MemoryBackend,
    slow: DocumentRef,
    delay: Duration,
    finished: Mutex<Vec<String>>,
}

#[async_trait]
impl Backend for SlowDocumentBackend {
    async fn get_document(
        &self,
        document: &DocumentRef,
        source: Source,
    ) -> Result<DocumentSnapshot, BackendError> {
        if *document == self.slow {
            tokio::time::sleep(self.delay).await;
        }
        let snapshot = self.inner.get_document(document, source).await?;
        self.finished
            .lock()
            .unwrap()
            .push(document.id().to_string());
        Ok(snapshot)
    }

    async fn get_query(
        &self,
        query: &Query,
        source: Source,
    ) -> Result<QuerySnapshot, BackendError> {
        self.inner.get_query(query, source).await
    }

    async fn add(
        &self,
        collection: &CollectionRef,
        data: DocumentData,
    ) -> Result<DocumentRef, BackendError> {
        self.inner.add(collection, data).await
    }

    async fn set(
        &self,
        document: &DocumentRef,
        data: DocumentData,
        options: &SetOptions,
    ) -> Result<(), BackendError> {
        self.inner.set(document, data, options).await
    }

    async fn update(&self, document: &DocumentRef, data: DocumentData) -> Result<(), BackendError> {
        self.inner.update(document, data).await
    }

    async fn delete(&self, document: &DocumentRef) -> Result<(), BackendError> {
        self.inner.delete(document).await
    }

    fn listen(
        &self,
        target: ListenTarget,
        sink: SnapshotSink,
    ) -> Result<ListenerRegistration, BackendError> {
        self.inner.listen(target, sink)
    }
}

/// Test a set mutation followed by a read of the same shape.
#[tokio::test]
async fn test_set_round_trip() {
    let backend = Arc::new(MemoryBackend::new());
    let link = DocumentLink::new(backend);

    let set = operation(json!({
        "kind": "mutation",
        "directives": [{"name": "mutation"}],
        "selection": [{
            "name": "user",
            "arguments": {"input": {"$var": "input"}},
            "directives": [{
                "name": "mutation",
                "arguments": {"path": "users", "rootType": "collection", "mutationType": "set"}
            }],
            "selection": [{"name": "id"}, {"name": "key"}]
        }],
        "variables": {"input": {"id": "u1", "key": "v2"}}
    }));
    let mut stream = link.request(set, None);
    let response = stream.next().await.unwrap().unwrap();
    assert_eq!(
        response.data,
        json!({"user": {"id": "u1", "key": "v2", "__typename": "User"}})
    );

    let read = operation(json!({
        "directives": [{"name": "query"}],
        "selection": [{
            "name": "user",
            "directives": [{
                "name": "query",
                "arguments": {"path": "users.u1", "rootType": "collection"}
            }],
            "selection": [{"name": "__typename"}, {"name": "id"}, {"name": "key"}]
        }]
    }));
    let mut stream = link.request(read, None);
    let response = stream.next().await.unwrap().unwrap();
    assert_eq!(
        response.data,
        json!({"user": {"__typename": "User", "id": "u1", "key": "v2"}})
    );
}

/// Test that exported values reach descendant filters.
#[tokio::test]
async fn test_exported_filter_value() {
    let link = DocumentLink::new(seeded());
    let query = operation(json!({
        "directives": [{"name": "query"}],
        "selection": [{
            "name": "limits",
            "directives": [{
                "name": "query",
                "arguments": {"path": "settings/limits", "rootType": "document"}
            }],
            "selection": [
                {"name": "minAge", "directives": [{"name": "field", "arguments": {"key": "minAge"}}]},
                {
                    "name": "adults",
                    "directives": [{
                        "name": "query",
                        "arguments": {
                            "path": "users",
                            "rootType": "collection",
                            "where": [{"fieldPath": "age", "op": ">=", "val": "$fields{minAge}"}]
                        }
                    }],
                    "selection": [{"name": "name"}]
                }
            ]
        }]
    }));

    let mut stream = link.request(query, None);
    let response = stream.next().await.unwrap().unwrap();
    assert_eq!(
        response.data["limits"]["adults"],
        json!([{"name": "Alice", "__typename": "Adult"}])
    );
}

/// Test mutation type and reference kind mismatches.
#[tokio::test]
async fn test_invalid_mutations() {
    let link = DocumentLink::new(seeded());
    let mutation = |path: &str, root_type: &str, mutation_type: &str| {
        operation(json!({
            "kind": "mutation",
            "directives": [{"name": "mutation"}],
            "selection": [{
                "name": "write",
                "directives": [{
                    "name": "mutation",
                    "arguments": {
                        "path": path,
                        "rootType": root_type,
                        "mutationType": mutation_type,
                        "dataArg": {"name": "Eve"}
                    }
                }],
                "selection": [{"name": "id"}]
            }]
        }))
    };

    let mut stream = link.request(mutation("users/u1", "document", "add"), None);
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::InvalidMutation(_)), "{err}");
    assert!(stream.next().await.is_none());

    // A set on a collection needs an `id` in the payload to pick its document.
    let mut stream = link.request(mutation("users.u1.posts", "collection", "set"), None);
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::Config(_)), "{err}");
}

/// Test that a deleted document answers only its typename and id.
#[tokio::test]
async fn test_delete_mutation() {
    let backend = seeded();
    let link = DocumentLink::new(backend.clone());
    let delete = operation(json!({
        "kind": "mutation",
        "directives": [{"name": "mutation"}],
        "selection": [{
            "name": "removeUser",
            "directives": [{
                "name": "mutation",
                "arguments": {
                    "path": "users",
                    "rootType": "collection",
                    "mutationType": "delete",
                    "type": "User",
                    "dataArg": {"id": "u2"}
                }
            }],
            "selection": [{"name": "id"}, {"name": "name"}]
        }]
    }));

    let mut stream = link.request(delete, None);
    let response = stream.next().await.unwrap().unwrap();
    assert_eq!(
        response.data,
        json!({"removeUser": {"id": "u2", "name": null, "__typename": "User"}})
    );

    let users = backend
        .get_query(
            &docql_runtime::Query::new(CollectionRef::new("users")),
            docql_runtime::Source::Default,
        )
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
}

/// Test live updates, cancellation and listener release.
#[tokio::test]
async fn test_subscription_lifecycle() {
    let backend = seeded();
    let link = DocumentLink::new(backend.clone());
    let live = operation(json!({
        "directives": [{"name": "query"}],
        "selection": [{
            "name": "users",
            "directives": [{
                "name": "query",
                "arguments": {"rootType": "collection", "subscribe": true}
            }],
            "selection": [{"name": "name"}]
        }]
    }));

    let mut stream = link.request(live, None);
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.data["users"].as_array().map(Vec::len), Some(2));

    wait_for_listeners(&backend, 1).await;
    let mut carol = serde_json::Map::new();
    carol.insert("name".to_string(), json!("Carol"));
    backend
        .add(&CollectionRef::new("users"), carol)
        .await
        .unwrap();

    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.data["users"].as_array().map(Vec::len), Some(3));

    stream.cancel().await;
    assert_eq!(backend.listener_count(), 0);
    assert_eq!(backend.detach_count(), 1);
}

/// Test that a failing re-run ends the stream and releases listeners once.
#[tokio::test]
async fn test_rerun_error_releases_listeners() {
    let backend = seeded();
    let link = DocumentLink::new(backend.clone());
    let live = operation(json!({
        "directives": [{"name": "query"}],
        "selection": [
            {
                "name": "users",
                "directives": [{
                    "name": "query",
                    "arguments": {"rootType": "collection", "subscribe": true}
                }],
                "selection": [{"name": "name"}]
            },
            {
                "name": "limits",
                "directives": [{
                    "name": "query",
                    "arguments": {"path": "settings/limits", "rootType": "document", "subscribe": true}
                }],
                "selection": [{"name": "minAge"}]
            }
        ]
    }));

    let mut stream = link.request(live, None);
    stream.next().await.unwrap().unwrap();
    wait_for_listeners(&backend, 2).await;

    let mut data = serde_json::Map::new();
    data.insert("minAge".to_string(), json!(18));
    backend
        .update(&CollectionRef::new("settings").doc("limits"), data)
        .await
        .unwrap();
    // The re-run triggered by the update above is denied.
    backend.fail_next(BackendError::new(
        BackendErrorCode::PermissionDenied,
        "denied",
    ));

    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(
        err.backend().map(|e| e.code),
        Some(BackendErrorCode::PermissionDenied)
    );
    assert!(stream.next().await.is_none());
    assert_eq!(backend.listener_count(), 0);
    assert_eq!(backend.detach_count(), 2);
}

/// Test that an aborted re-run is skipped and the stream keeps going.
#[tokio::test]
async fn test_aborted_rerun_is_skipped() {
    let backend = seeded();
    let link = DocumentLink::new(backend.clone());
    let live = operation(json!({
        "directives": [{"name": "query"}],
        "selection": [{
            "name": "users",
            "directives": [{
                "name": "query",
                "arguments": {"rootType": "collection", "subscribe": true}
            }],
            "selection": [{"name": "name"}]
        }]
    }));

    let mut stream = link.request(live, None);
    stream.next().await.unwrap().unwrap();
    wait_for_listeners(&backend, 1).await;

    let users = CollectionRef::new("users");
    let mut first = serde_json::Map::new();
    first.insert("name".to_string(), json!("Carol"));
    backend.add(&users, first).await.unwrap();
    let mut second = serde_json::Map::new();
    second.insert("name".to_string(), json!("Dan"));
    backend.add(&users, second).await.unwrap();
    // The re-run for the first push is aborted; the second one succeeds.
    backend.fail_next(BackendError::aborted("superseded"));

    let response = stream.next().await.unwrap().unwrap();
    assert_eq!(response.data["users"].as_array().map(Vec::len), Some(4));
    stream.cancel().await;
    assert_eq!(backend.detach_count(), 1);
}

/// Test that operations without store directives go to the next link.
#[tokio::test]
async fn test_pass_through() {
    let link = DocumentLink::with_config(seeded(), LinkConfig::default().stream_buffer(1));
    let local = operation(json!({
        "name": "LocalState",
        "directives": [{"name": "client"}],
        "selection": [{"name": "theme"}]
    }));

    let mut stream = link.request(local, Some(&EchoLink));
    let response = stream.next().await.unwrap().unwrap();
    assert_eq!(response.data, json!({"echo": "LocalState"}));
    assert!(stream.next().await.is_none());
}

/// Test that sibling results keep field order when a later sibling finishes first.
#[tokio::test]
async fn test_siblings_keep_field_order() {
    let backend = Arc::new(SlowDocumentBackend {
        inner: MemoryBackend::with_seed(&json!({
            "items": {"a": {"v": 1}, "b": {"v": 2}}
        }))
        .unwrap(),
        slow: DocumentRef::new("items/a"),
        delay: Duration::from_millis(50),
        finished: Mutex::new(Vec::new()),
    });
    let link = DocumentLink::new(backend.clone());
    let query = operation(json!({
        "directives": [{"name": "query"}],
        "selection": [
            {
                "name": "first",
                "directives": [{
                    "name": "query",
                    "arguments": {"path": "items/a", "rootType": "document", "type": "Item"}
                }],
                "selection": [{"name": "v"}]
            },
            {
                "name": "second",
                "directives": [{
                    "name": "query",
                    "arguments": {"path": "items/b", "rootType": "document", "type": "Item"}
                }],
                "selection": [{"name": "v"}]
            }
        ]
    }));

    let mut stream = link.request(query, None);
    let response = stream.next().await.unwrap().unwrap();

    assert_eq!(*backend.finished.lock().unwrap(), ["b", "a"]);
    let keys: Vec<&str> = response
        .data
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, ["first", "second"]);
    assert_eq!(response.data["first"]["v"], json!(1));
    assert_eq!(response.data["second"]["v"], json!(2));
}
