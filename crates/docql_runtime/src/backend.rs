//! The document store client contract.
//!
//! The engine never opens connections itself; it is handed a live client
//! implementing [`Backend`] and threads it through every call.

use crate::query::Query;
use crate::snapshot::{DocumentData, DocumentSnapshot, QuerySnapshot};
use async_trait::async_trait;
use docql_core::{BackendError, CollectionRef, DocumentRef, ResourcePath};
use std::fmt;
use tokio::sync::mpsc;

/// Where a read should be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Source {
    /// Server if reachable, cache otherwise.
    #[default]
    Default,
    /// Server only.
    Server,
    /// Local cache only.
    Cache,
}

impl Source {
    /// Parses a source name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "default" => Some(Self::Default),
            "server" => Some(Self::Server),
            "cache" => Some(Self::Cache),
            _ => None,
        }
    }
}

/// Options for a full-document write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge into the existing document instead of replacing it.
    pub merge: bool,
    /// Only write these field paths. Implies `merge`.
    pub merge_fields: Option<Vec<String>>,
}

impl SetOptions {
    /// Returns options that replace the whole document.
    pub fn replace() -> Self {
        Self::default()
    }

    /// Returns options that merge into the existing document.
    pub fn merge() -> Self {
        Self {
            merge: true,
            merge_fields: None,
        }
    }

    /// Returns options that only write the given fields.
    pub fn merge_fields(fields: Vec<String>) -> Self {
        Self {
            merge: true,
            merge_fields: Some(fields),
        }
    }
}

/// Something a listener can watch.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenTarget {
    Document(DocumentRef),
    Query(Query),
}

impl ListenTarget {
    /// Returns true if a write to `document` can change what this target sees.
    pub fn is_affected_by(&self, document: &DocumentRef) -> bool {
        match self {
            Self::Document(target) => target == document,
            Self::Query(query) => query.collection() == &document.parent(),
        }
    }

    /// Returns the watched path.
    pub fn path(&self) -> &ResourcePath {
        match self {
            Self::Document(document) => document.path(),
            Self::Query(query) => query.collection().path(),
        }
    }
}

impl fmt::Display for ListenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document(document) => write!(f, "document {document}"),
            Self::Query(query) => write!(f, "query on {}", query.collection()),
        }
    }
}

/// Receives a notice each time a watched target changes.
pub type SnapshotSink = mpsc::UnboundedSender<Result<ListenTarget, BackendError>>;

/// An attached listener. Dropping it detaches the listener.
pub struct ListenerRegistration {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    /// Creates a registration that runs `detach` exactly once.
    pub fn new<F>(detach: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Detaches the listener now.
    pub fn detach(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// A client for a collection/document store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Opens a collection by path.
    fn collection(&self, path: &str) -> CollectionRef {
        CollectionRef::new(path)
    }

    /// Opens a document by path.
    fn document(&self, path: &str) -> DocumentRef {
        DocumentRef::new(path)
    }

    /// Starts a query over every document in a collection.
    fn query(&self, collection: &CollectionRef) -> Query {
        Query::new(collection.clone())
    }

    /// Reads one document.
    async fn get_document(
        &self,
        document: &DocumentRef,
        source: Source,
    ) -> Result<DocumentSnapshot, BackendError>;

    /// Runs a collection query.
    async fn get_query(&self, query: &Query, source: Source)
        -> Result<QuerySnapshot, BackendError>;

    /// Adds a document with a generated id.
    async fn add(
        &self,
        collection: &CollectionRef,
        data: DocumentData,
    ) -> Result<DocumentRef, BackendError>;

    /// Writes a whole document.
    async fn set(
        &self,
        document: &DocumentRef,
        data: DocumentData,
        options: &SetOptions,
    ) -> Result<(), BackendError>;

    /// Patches fields of an existing document.
    async fn update(&self, document: &DocumentRef, data: DocumentData)
        -> Result<(), BackendError>;

    /// Deletes a document.
    async fn delete(&self, document: &DocumentRef) -> Result<(), BackendError>;

    /// Attaches a listener that reports changes to `target` into `sink`.
    fn listen(
        &self,
        target: ListenTarget,
        sink: SnapshotSink,
    ) -> Result<ListenerRegistration, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_registration_detaches_once() {
        let detached = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&detached);
        let registration = ListenerRegistration::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registration.detach();
        assert_eq!(detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_detaches_on_drop() {
        let detached = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&detached);
        {
            let _registration = ListenerRegistration::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listen_target_affected_by() {
        let users = CollectionRef::new("users");
        let alice = users.doc("alice");
        let query = ListenTarget::Query(Query::new(users.clone()));

        assert!(query.is_affected_by(&alice));
        assert!(!query.is_affected_by(&alice.collection("posts").doc("p1")));
        assert!(ListenTarget::Document(alice.clone()).is_affected_by(&alice));
        assert!(!ListenTarget::Document(alice).is_affected_by(&users.doc("bob")));
    }

    #[test]
    fn test_source_parse() {
        assert_eq!(Source::parse("SERVER"), Some(Source::Server));
        assert_eq!(Source::parse("nowhere"), None);
    }
}
