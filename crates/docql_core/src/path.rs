//! Resource paths and references into a document store.
//!
//! A store is a tree that alternates between collections and documents:
//! `users` is a collection, `users/u1` a document in it, `users/u1/posts`
//! a sub-collection of that document, and so on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A slash-separated path into the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// Creates an empty (root) path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a slash-separated path. Empty segments are dropped.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Returns the path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the last segment, or an empty string for the root.
    pub fn last(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// Returns a new path with `segment` appended.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(ResourcePath::parse(segment).segments);
        Self { segments }
    }

    /// Returns the path without its last segment.
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    /// Returns true if `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &ResourcePath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true for the root path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl From<String> for ResourcePath {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

impl From<&str> for ResourcePath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.to_string()
    }
}

/// A reference to a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    path: ResourcePath,
}

impl CollectionRef {
    /// Creates a collection reference at `path`.
    pub fn new(path: impl Into<ResourcePath>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the collection's path.
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Returns the collection id (last path segment).
    pub fn id(&self) -> &str {
        self.path.last()
    }

    /// Navigates to a document in this collection.
    pub fn doc(&self, id: &str) -> DocumentRef {
        DocumentRef {
            path: self.path.child(id),
        }
    }

    /// Returns the document this collection belongs to, if it is nested.
    pub fn parent(&self) -> Option<DocumentRef> {
        let parent = self.path.parent();
        (!parent.is_empty()).then_some(DocumentRef { path: parent })
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.fmt(f)
    }
}

/// A reference to a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    path: ResourcePath,
}

impl DocumentRef {
    /// Creates a document reference at `path`.
    pub fn new(path: impl Into<ResourcePath>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the document's path.
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Returns the document id (last path segment).
    pub fn id(&self) -> &str {
        self.path.last()
    }

    /// Navigates to a sub-collection of this document.
    pub fn collection(&self, name: &str) -> CollectionRef {
        CollectionRef {
            path: self.path.child(name),
        }
    }

    /// Returns the collection containing this document.
    pub fn parent(&self) -> CollectionRef {
        CollectionRef {
            path: self.path.parent(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.fmt(f)
    }
}

/// The kind of a [`Reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Collection,
    Document,
}

impl ReferenceKind {
    /// Parses a kind name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "collection" => Some(Self::Collection),
            "document" | "doc" => Some(Self::Document),
            _ => None,
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection => write!(f, "collection"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// Either a collection or a document reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Collection(CollectionRef),
    Document(DocumentRef),
}

impl Reference {
    /// Returns the kind of this reference.
    pub fn kind(&self) -> ReferenceKind {
        match self {
            Self::Collection(_) => ReferenceKind::Collection,
            Self::Document(_) => ReferenceKind::Document,
        }
    }

    /// Returns the referenced path.
    pub fn path(&self) -> &ResourcePath {
        match self {
            Self::Collection(collection) => collection.path(),
            Self::Document(document) => document.path(),
        }
    }
}

impl From<CollectionRef> for Reference {
    fn from(collection: CollectionRef) -> Self {
        Self::Collection(collection)
    }
}

impl From<DocumentRef> for Reference {
    fn from(document: DocumentRef) -> Self {
        Self::Document(document)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.path())
    }
}
