//! Resolution of dotted directive paths into store references.

use crate::backend::Backend;
use docql_core::{LinkError, LinkResult, Reference, ReferenceKind};

/// Resolves `path` against the store, starting from a root of `root_kind`.
///
/// The first dot-separated segment opens the root. Every further segment
/// steps one level down, and the kind of the current reference decides how:
/// below a collection it names a document, below a document it names a
/// sub-collection. The segment text itself is never inspected.
pub fn resolve_reference<B: Backend + ?Sized>(
    client: &B,
    path: &str,
    root_kind: Option<ReferenceKind>,
) -> LinkResult<Reference> {
    let root_kind = root_kind.ok_or_else(|| LinkError::config("rootType is required"))?;

    let mut segments = path.split('.');
    let root = segments.next().unwrap_or_default();
    let root = match root_kind {
        ReferenceKind::Collection => Reference::Collection(client.collection(root)),
        ReferenceKind::Document => Reference::Document(client.document(root)),
    };

    Ok(segments.fold(root, |reference, segment| match reference {
        Reference::Collection(collection) => Reference::Document(collection.doc(segment)),
        Reference::Document(document) => Reference::Collection(document.collection(segment)),
    }))
}
