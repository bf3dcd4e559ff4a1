//! Core types for docql.
//!
//! This crate provides the foundational types shared by the engine:
//! - `error`: Error taxonomy for resolution and backend failures
//! - `path`: Resource paths and collection/document references
//! - `operation`: The annotated field tree an operation carries
//! - `exports`: Values propagated from leaf fields to descendant directives
//! - `naming`: Typename inflection

pub mod error;
pub mod exports;
pub mod naming;
pub mod operation;
pub mod path;

pub use error::{BackendError, BackendErrorCode, LinkError, LinkResult};
pub use exports::Exports;
pub use naming::{pascal_case, resolve_typename};
pub use operation::{
    ArgValue, ComputeScope, ComputedArg, Directive, Field, Operation, OperationKind, Variables,
};
pub use path::{CollectionRef, DocumentRef, Reference, ReferenceKind, ResourcePath};
