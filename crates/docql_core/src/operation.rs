//! The annotated field tree an operation carries.
//!
//! Parsing operation text is done upstream; the engine receives this tree
//! with directive arguments attached to each field. Operations also
//! deserialize from JSON, where an argument of the form `{"$var": "name"}`
//! refers to a variable and anything else is a literal.

use crate::exports::Exports;
use crate::path::CollectionRef;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Variable bindings of an operation.
pub type Variables = IndexMap<String, Value>;

/// The kind of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// What a computed argument gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ComputeScope<'a> {
    /// The collection the query is being built on.
    pub reference: &'a CollectionRef,
    /// Values exported so far in this branch.
    pub exports: &'a Exports,
}

type ComputeFn = dyn Fn(ComputeScope<'_>) -> Value + Send + Sync;

/// A directive argument computed from the query's scope.
#[derive(Clone)]
pub struct ComputedArg(Arc<ComputeFn>);

impl ComputedArg {
    /// Wraps a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ComputeScope<'_>) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Evaluates the argument.
    pub fn compute(&self, scope: ComputeScope<'_>) -> Value {
        (self.0)(scope)
    }
}

impl fmt::Debug for ComputedArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ComputedArg(..)")
    }
}

/// An argument value as written in the operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "Value")]
pub enum ArgValue {
    /// A literal value.
    Literal(Value),
    /// A reference to an operation variable.
    Variable(String),
    /// A value computed when the query is built.
    Computed(ComputedArg),
}

impl ArgValue {
    /// Returns the literal value, resolving variables.
    ///
    /// Computed values have no literal form and yield `None`.
    pub fn literal(&self, variables: &Variables) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Variable(name) => Some(variables.get(name).cloned().unwrap_or(Value::Null)),
            Self::Computed(_) => None,
        }
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if map.len() == 1 {
                if let Some(Value::String(name)) = map.get("$var") {
                    return Self::Variable(name.clone());
                }
            }
        }
        Self::Literal(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<ComputedArg> for ArgValue {
    fn from(value: ComputedArg) -> Self {
        Self::Computed(value)
    }
}

/// A directive attached to a field or operation.
#[derive(Debug, Clone, Deserialize)]
pub struct Directive {
    /// Directive name without the `@`.
    pub name: String,
    /// Arguments in the order they were written.
    #[serde(default)]
    pub arguments: IndexMap<String, ArgValue>,
}

impl Directive {
    /// Creates a directive with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: IndexMap::new(),
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.arguments.get(name)
    }
}

/// A field in the selection tree.
#[derive(Debug, Clone, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Response alias.
    #[serde(default)]
    pub alias: Option<String>,
    /// Field arguments.
    #[serde(default)]
    pub arguments: IndexMap<String, ArgValue>,
    /// Directives on this field.
    #[serde(default)]
    pub directives: Vec<Directive>,
    /// Sub-fields; empty for a leaf.
    #[serde(default)]
    pub selection: Vec<Field>,
}

impl Field {
    /// Creates a leaf field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: IndexMap::new(),
            directives: Vec::new(),
            selection: Vec::new(),
        }
    }

    /// Sets the response alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds a field argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Adds a directive.
    #[must_use]
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// Appends a sub-field.
    #[must_use]
    pub fn select(mut self, field: Field) -> Self {
        self.selection.push(field);
        self
    }

    /// Appends leaf sub-fields by name.
    #[must_use]
    pub fn select_all<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.extend(names.into_iter().map(Field::new));
        self
    }

    /// Returns the key this field's value is stored under in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Returns true if the field has no sub-fields.
    pub fn is_leaf(&self) -> bool {
        self.selection.is_empty()
    }

    /// Finds a directive by name.
    pub fn find_directive(&self, name: &str) -> Option<&Directive> {
        self.directives.iter().find(|d| d.name == name)
    }

    /// Appends `__typename` to this field's selection and every selection
    /// below it that does not already request it.
    pub fn add_typename(&mut self) {
        if self.selection.is_empty() {
            return;
        }
        for child in &mut self.selection {
            child.add_typename();
        }
        if !self.selection.iter().any(|f| f.name == "__typename") {
            self.selection.push(Field::new("__typename"));
        }
    }
}

/// An operation ready for execution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    /// Operation kind.
    #[serde(default)]
    pub kind: OperationKind,
    /// Operation name.
    #[serde(default)]
    pub name: Option<String>,
    /// Directives on the operation itself.
    #[serde(default)]
    pub directives: Vec<Directive>,
    /// Root fields.
    #[serde(default)]
    pub selection: Vec<Field>,
    /// Variable bindings.
    #[serde(default)]
    pub variables: Variables,
}

impl Operation {
    /// Creates an empty operation of the given kind.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Creates a query.
    pub fn query() -> Self {
        Self::new(OperationKind::Query)
    }

    /// Creates a mutation.
    pub fn mutation() -> Self {
        Self::new(OperationKind::Mutation)
    }

    /// Creates a subscription.
    pub fn subscription() -> Self {
        Self::new(OperationKind::Subscription)
    }

    /// Sets the operation name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds an operation-level directive.
    #[must_use]
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// Appends a root field.
    #[must_use]
    pub fn select(mut self, field: Field) -> Self {
        self.selection.push(field);
        self
    }

    /// Binds a variable.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Returns true if the operation carries a directive with this name.
    pub fn has_directive(&self, name: &str) -> bool {
        self.directives.iter().any(|d| d.name == name)
    }

    /// Visits every field in the tree, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Field)) {
        fn walk_field<'a>(field: &'a Field, visit: &mut impl FnMut(&'a Field)) {
            visit(field);
            for child in &field.selection {
                walk_field(child, visit);
            }
        }
        for field in &self.selection {
            walk_field(field, visit);
        }
    }

    /// Appends `__typename` to every non-root selection set.
    pub fn add_typename(&mut self) {
        for field in &mut self.selection {
            field.add_typename();
        }
    }
}
