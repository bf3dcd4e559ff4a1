//! Runtime for docql.
//!
//! This crate resolves directive-annotated operations against a document store:
//! - `backend`: The store client contract
//! - `snapshot`: Point-in-time document and query reads
//! - `reference`: Dotted path resolution
//! - `directives`: Typed `@query`, `@mutation`, `@ref` and `@field` arguments
//! - `query`: Query building with placeholder substitution
//! - `executor`: Recursive field resolution
//! - `mutation`: Add, set, update and delete
//! - `subscription`: Result streams and live re-resolution
//! - `link`: The request entry point
//! - `memory`: An in-memory store

pub mod backend;
pub mod directives;
pub mod executor;
pub mod link;
pub mod memory;
pub mod mutation;
pub mod query;
pub mod reference;
pub mod snapshot;
pub mod subscription;

pub use backend::{Backend, ListenTarget, ListenerRegistration, SetOptions, SnapshotSink, Source};
pub use directives::{
    has_subscribe_directive, ExportKey, FieldDirective, FieldPlan, MutationDirective,
    MutationType, QueryArgs, QueryDirective, RefDirective, Substitution, Template,
};
pub use executor::{Executor, ExecutorConfig, Resolved, ResolverRoot, Response};
pub use link::{is_document_operation, DocumentLink, LinkConfig, NextLink};
pub use memory::MemoryBackend;
pub use mutation::{check_compatibility, mutation_payload, mutation_target};
pub use query::{build_query, Direction, Filter, FilterOp, OrderBy, Query, QueryOp};
pub use reference::resolve_reference;
pub use snapshot::{DocumentData, DocumentSnapshot, PendingValue, QuerySnapshot, ServerTimestamps};
pub use subscription::{spawn_resolution, ResultStream};
