//! Directive-driven execution of an operation against a store.

use crate::backend::{Backend, ListenTarget, Source};
use crate::directives::{FieldDirective, FieldPlan, QueryArgs, RefDirective};
use crate::mutation::execute_mutation;
use crate::query::build_query;
use crate::reference::resolve_reference;
use crate::snapshot::DocumentSnapshot;
use docql_core::{
    resolve_typename, CollectionRef, DocumentRef, Exports, Field, LinkError, LinkResult,
    Operation, OperationKind, Reference, Variables,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Executor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum sibling fields or collection items resolved at once.
    pub max_concurrent_fields: usize,
    /// Append `__typename` to every non-root selection set.
    pub add_typename: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fields: 100,
            add_typename: true,
        }
    }
}

impl ExecutorConfig {
    /// Sets the concurrency bound.
    #[must_use]
    pub fn max_concurrent_fields(mut self, max: usize) -> Self {
        self.max_concurrent_fields = max;
        self
    }

    /// Enables or disables automatic `__typename` selection.
    #[must_use]
    pub fn add_typename(mut self, enabled: bool) -> Self {
        self.add_typename = enabled;
        self
    }
}

/// The result of one execution pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Result data, keyed the way the operation requested it.
    pub data: Value,
}

impl Response {
    /// Creates a response.
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

/// A fetched entity and the typename it is reported under.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverRoot {
    pub typename: String,
    pub snapshot: DocumentSnapshot,
}

/// What a branch field resolved to, before its sub-fields are completed.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// A single document.
    Entity(ResolverRoot),
    /// The documents of a collection query, in query order.
    Entities(Vec<ResolverRoot>),
    /// A document that was just deleted.
    Deleted { typename: String, id: String },
}

type FieldFuture<'a> = Pin<Box<dyn Future<Output = LinkResult<Value>> + Send + 'a>>;
type BranchFuture<'a> = Pin<Box<dyn Future<Output = LinkResult<(usize, Value)>> + Send + 'a>>;

/// Executes operations against a store.
pub struct Executor<B: ?Sized> {
    backend: Arc<B>,
    config: ExecutorConfig,
}

impl<B: ?Sized> Clone for Executor<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

impl<B: ?Sized> std::fmt::Debug for Executor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish()
    }
}

impl<B: Backend + ?Sized> Executor<B> {
    /// Creates an executor with the default configuration.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, ExecutorConfig::default())
    }

    /// Creates an executor with configuration.
    pub fn with_config(backend: Arc<B>, config: ExecutorConfig) -> Self {
        Self { backend, config }
    }

    /// Returns the store client.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs one full pass over the operation.
    pub async fn execute(&self, operation: &Operation) -> LinkResult<Response> {
        self.run(operation, None).await
    }

    /// Runs one full pass and also returns every target fetched under a
    /// directive with `subscribe: true`.
    pub async fn execute_tracked(
        &self,
        operation: &Operation,
    ) -> LinkResult<(Response, Vec<ListenTarget>)> {
        let targets = Mutex::new(Vec::new());
        let response = self.run(operation, Some(&targets)).await?;
        let targets = targets.into_inner().unwrap_or_else(PoisonError::into_inner);
        Ok((response, targets))
    }

    async fn run(
        &self,
        operation: &Operation,
        listen: Option<&Mutex<Vec<ListenTarget>>>,
    ) -> LinkResult<Response> {
        let prepared;
        let operation = if self.config.add_typename {
            let mut copy = operation.clone();
            copy.add_typename();
            prepared = copy;
            &prepared
        } else {
            operation
        };

        debug!(
            name = operation.name.as_deref().unwrap_or("<anonymous>"),
            kind = %operation.kind,
            "executing operation"
        );

        let pass = Pass {
            backend: &*self.backend,
            variables: &operation.variables,
            config: &self.config,
            listen,
        };
        let serial = operation.kind == OperationKind::Mutation;
        let data =
            resolve_selection(&pass, &operation.selection, None, Exports::new(), serial).await?;
        Ok(Response::new(data))
    }
}

/// State shared by every field of one pass.
struct Pass<'p, B: ?Sized> {
    backend: &'p B,
    variables: &'p Variables,
    config: &'p ExecutorConfig,
    listen: Option<&'p Mutex<Vec<ListenTarget>>>,
}

impl<'p, B: Backend + ?Sized> Pass<'p, B> {
    fn concurrency(&self) -> usize {
        self.config.max_concurrent_fields.max(1)
    }

    fn record(&self, target: ListenTarget) {
        if let Some(listen) = self.listen {
            let mut targets = listen.lock().unwrap_or_else(PoisonError::into_inner);
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    async fn fetch_collection(
        &self,
        collection: &CollectionRef,
        args: &QueryArgs,
        source: Source,
        subscribe: bool,
        exports: &Exports,
        typename: String,
    ) -> LinkResult<Resolved> {
        let query = build_query(self.backend, collection, args, exports)?;
        if subscribe {
            self.record(ListenTarget::Query(query.clone()));
        }

        debug!(collection = %collection, ops = query.ops().len(), "fetching collection");
        let snapshot = self.backend.get_query(&query, source).await?;
        Ok(Resolved::Entities(
            snapshot
                .into_docs()
                .into_iter()
                .map(|snapshot| ResolverRoot {
                    typename: typename.clone(),
                    snapshot,
                })
                .collect(),
        ))
    }

    async fn fetch_document(
        &self,
        document: DocumentRef,
        source: Source,
        subscribe: bool,
        typename: String,
    ) -> LinkResult<Resolved> {
        if subscribe {
            self.record(ListenTarget::Document(document.clone()));
        }

        debug!(document = %document, "fetching document");
        let snapshot = self.backend.get_document(&document, source).await?;
        Ok(Resolved::Entity(ResolverRoot { typename, snapshot }))
    }

    async fn follow_ref(
        &self,
        field: &Field,
        directive: &RefDirective,
        parent: &ResolverRoot,
        exports: &Exports,
    ) -> LinkResult<Resolved> {
        let name = directive.path.as_deref().unwrap_or(&field.name);
        let collection = parent.snapshot.reference().collection(name);
        let typename = resolve_typename(directive.type_name.as_deref(), &field.name);
        self.fetch_collection(
            &collection,
            &directive.query,
            directive.source,
            directive.subscribe,
            exports,
            typename,
        )
        .await
    }
}

fn no_context(field: &Field) -> LinkError {
    LinkError::resolution(&field.name, "no snapshot or directive")
}

/// Resolves a selection set against `parent`.
///
/// Leaves are read in order and write their exports into this selection's
/// scope. Every other field starts from a copy of the scope as it stood at
/// the field's position; those run concurrently unless `serial` is set.
fn resolve_selection<'a, B: Backend + ?Sized>(
    pass: &'a Pass<'a, B>,
    fields: &'a [Field],
    parent: Option<&'a ResolverRoot>,
    mut exports: Exports,
    serial: bool,
) -> FieldFuture<'a> {
    Box::pin(async move {
        let mut values: Vec<Option<Value>> = vec![None; fields.len()];
        let mut branches = Vec::new();

        for (index, field) in fields.iter().enumerate() {
            let plan = FieldPlan::parse(field, pass.variables)?;
            if !field.is_leaf() || !matches!(plan, FieldPlan::Field(_) | FieldPlan::None) {
                branches.push((index, field, plan, exports.clone()));
                continue;
            }
            let directive = match &plan {
                FieldPlan::Field(directive) => Some(directive),
                _ => None,
            };
            let root = parent.ok_or_else(|| no_context(field))?;
            values[index] = Some(read_leaf(field, directive, root, &mut exports));
        }

        let resolved: Vec<(usize, Value)> = if serial {
            let mut resolved = Vec::with_capacity(branches.len());
            for (index, field, plan, exports) in branches {
                let value = resolve_branch(pass, field, plan, parent, exports).await?;
                resolved.push((index, value));
            }
            resolved
        } else {
            let mut pending: Vec<BranchFuture<'a>> = Vec::with_capacity(branches.len());
            for (index, field, plan, exports) in branches {
                pending.push(Box::pin(async move {
                    let value = resolve_branch(pass, field, plan, parent, exports).await?;
                    Ok((index, value))
                }));
            }
            stream::iter(pending)
                .buffered(pass.concurrency())
                .try_collect()
                .await?
        };
        for (index, value) in resolved {
            values[index] = Some(value);
        }

        let mut object = Map::new();
        for (field, value) in fields.iter().zip(values) {
            object.insert(
                field.response_key().to_string(),
                value.unwrap_or(Value::Null),
            );
        }
        Ok(Value::Object(object))
    })
}

fn read_leaf(
    field: &Field,
    directive: Option<&FieldDirective>,
    root: &ResolverRoot,
    exports: &mut Exports,
) -> Value {
    let server_timestamps = directive.map(|d| d.server_timestamps).unwrap_or_default();
    let value = match field.name.as_str() {
        "__typename" => Value::String(root.typename.clone()),
        "id" => Value::String(root.snapshot.id().to_string()),
        name => root.snapshot.get(name, server_timestamps),
    };

    if let Some(key) = directive.and_then(|d| d.key.as_ref()) {
        exports.insert(key.resolve(&field.name), value.clone());
    }
    value
}

async fn resolve_branch<'a, B: Backend + ?Sized>(
    pass: &'a Pass<'a, B>,
    field: &'a Field,
    plan: FieldPlan,
    parent: Option<&'a ResolverRoot>,
    exports: Exports,
) -> LinkResult<Value> {
    let resolved = match plan {
        FieldPlan::Query(directive) => {
            let path = directive.path.as_deref().unwrap_or(&field.name);
            let typename = resolve_typename(directive.type_name.as_deref(), &field.name);
            match resolve_reference(pass.backend, path, directive.root_type)? {
                Reference::Collection(collection) => {
                    pass.fetch_collection(
                        &collection,
                        &directive.query,
                        directive.source,
                        directive.subscribe,
                        &exports,
                        typename,
                    )
                    .await?
                }
                Reference::Document(document) => {
                    pass.fetch_document(document, directive.source, directive.subscribe, typename)
                        .await?
                }
            }
        }
        FieldPlan::Mutation(directive) => {
            execute_mutation(pass.backend, field, &directive, pass.variables).await?
        }
        FieldPlan::Ref(directive) => {
            let root = parent.ok_or_else(|| no_context(field))?;
            pass.follow_ref(field, &directive, root, &exports).await?
        }
        FieldPlan::Field(_) | FieldPlan::None => {
            let root = parent.ok_or_else(|| no_context(field))?;
            pass.follow_ref(field, &RefDirective::default(), root, &exports)
                .await?
        }
    };

    complete(pass, field, resolved, exports).await
}

async fn complete<'a, B: Backend + ?Sized>(
    pass: &'a Pass<'a, B>,
    field: &'a Field,
    resolved: Resolved,
    exports: Exports,
) -> LinkResult<Value> {
    if field.is_leaf() {
        return Ok(Value::Object(Map::new()));
    }

    match resolved {
        Resolved::Entity(root) => {
            resolve_selection(pass, &field.selection, Some(&root), exports, false).await
        }
        Resolved::Entities(roots) => {
            let mut pending: Vec<FieldFuture<'_>> = Vec::with_capacity(roots.len());
            for root in &roots {
                pending.push(resolve_selection(
                    pass,
                    &field.selection,
                    Some(root),
                    exports.clone(),
                    false,
                ));
            }
            let items: Vec<Value> = stream::iter(pending)
                .buffered(pass.concurrency())
                .try_collect()
                .await?;
            Ok(Value::Array(items))
        }
        Resolved::Deleted { typename, id } => Ok(Value::Object(
            field
                .selection
                .iter()
                .map(|child| {
                    let value = match child.name.as_str() {
                        "__typename" => Value::String(typename.clone()),
                        "id" => Value::String(id.clone()),
                        _ => Value::Null,
                    };
                    (child.response_key().to_string(), value)
                })
                .collect(),
        )),
    }
}
