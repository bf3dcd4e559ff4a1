//! Typed directives understood by the engine.
//!
//! This module turns the raw directive arguments attached to a field into:
//! - `@query` - fetch a collection or document as the field's value
//! - `@mutation` - write to the store, then re-read the written document
//! - `@ref` - follow a sub-collection of the parent document
//! - `@field` - read a leaf value and optionally export it
//!
//! Each field gets exactly one [`FieldPlan`], decided once before it is
//! resolved.

use crate::backend::Source;
use crate::snapshot::ServerTimestamps;
use docql_core::{
    ArgValue, ComputeScope, ComputedArg, Directive, Field, LinkError, LinkResult, Operation,
    ReferenceKind, Variables,
};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\$fields\{(\w+)\}").ok())
        .as_ref()
}

// =============================================================================
// Placeholder substitution
// =============================================================================

/// How a single argument value is produced.
#[derive(Debug, Clone)]
pub enum Substitution {
    /// Used as written.
    Literal(Value),
    /// A string containing a `$fields{key}` placeholder.
    Templated { template: String, key: String },
    /// Computed from the query's reference and exports.
    Computed(ComputedArg),
}

impl Substitution {
    /// Classifies a literal value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(template) => {
                let key = placeholder()
                    .and_then(|re| re.captures(&template))
                    .map(|captures| captures[1].to_string());
                match key {
                    Some(key) => Self::Templated { template, key },
                    None => Self::Literal(Value::String(template)),
                }
            }
            other => Self::Literal(other),
        }
    }

    /// Produces the argument value.
    ///
    /// A placeholder whose key was never exported is left in place. When the
    /// placeholder is the whole string the exported value replaces it as-is;
    /// otherwise its text is spliced into the string. Only the first
    /// placeholder is replaced.
    pub fn resolve(&self, scope: ComputeScope<'_>) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Computed(computed) => computed.compute(scope),
            Self::Templated { template, key } => {
                let Some(exported) = scope.exports.get(key) else {
                    return Value::String(template.clone());
                };
                let Some(found) = placeholder().and_then(|re| re.find(template)) else {
                    return Value::String(template.clone());
                };
                if found.range() == (0..template.len()) {
                    return exported.clone();
                }
                let text = match exported {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                let mut result = template.clone();
                result.replace_range(found.range(), &text);
                Value::String(result)
            }
        }
    }
}

/// A directive argument with its placeholders located.
#[derive(Debug, Clone)]
pub enum Template {
    /// A single value.
    Value(Substitution),
    /// An object; each immediate value is substituted.
    Object(IndexMap<String, Substitution>),
    /// A list of values or objects.
    List(Vec<Template>),
}

impl Template {
    /// Builds the template for an argument, with variables already bound.
    pub fn from_arg(arg: &ArgValue, variables: &Variables) -> Self {
        match arg {
            ArgValue::Computed(computed) => Self::Value(Substitution::Computed(computed.clone())),
            ArgValue::Literal(_) | ArgValue::Variable(_) => {
                let value = arg.literal(variables).unwrap_or(Value::Null);
                match value {
                    Value::Array(items) => {
                        Self::List(items.into_iter().map(Self::from_item).collect())
                    }
                    other => Self::from_item(other),
                }
            }
        }
    }

    fn from_item(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Substitution::from_value(value)))
                    .collect(),
            ),
            other => Self::Value(Substitution::from_value(other)),
        }
    }

    /// Produces the argument value.
    pub fn resolve(&self, scope: ComputeScope<'_>) -> Value {
        match self {
            Self::Value(substitution) => substitution.resolve(scope),
            Self::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, substitution)| (key.clone(), substitution.resolve(scope)))
                    .collect(),
            ),
            Self::List(items) => Value::Array(items.iter().map(|t| t.resolve(scope)).collect()),
        }
    }
}

// =============================================================================
// Directive arguments
// =============================================================================

/// Window, filter, order and limit arguments shared by `@query` and `@ref`.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub end_at: Option<Template>,
    pub end_before: Option<Template>,
    pub start_after: Option<Template>,
    pub start_at: Option<Template>,
    pub where_: Option<Template>,
    pub order_by: Option<Template>,
    pub limit: Option<Template>,
}

impl QueryArgs {
    fn read(args: &ArgReader<'_>) -> Self {
        Self {
            end_at: args.template("endAt"),
            end_before: args.template("endBefore"),
            start_after: args.template("startAfter"),
            start_at: args.template("startAt"),
            where_: args.template("where"),
            order_by: args.template("orderBy"),
            limit: args.template("limit"),
        }
    }
}

/// Arguments of `@query`.
#[derive(Debug, Clone, Default)]
pub struct QueryDirective {
    /// Dotted path; defaults to the field name.
    pub path: Option<String>,
    /// Kind of the first path segment.
    pub root_type: Option<ReferenceKind>,
    /// Explicit typename.
    pub type_name: Option<String>,
    /// Keep the result live.
    pub subscribe: bool,
    /// Read source preference.
    pub source: Source,
    /// Collection query arguments.
    pub query: QueryArgs,
}

/// Arguments of `@ref`.
#[derive(Debug, Clone, Default)]
pub struct RefDirective {
    /// Sub-collection name; defaults to the field name.
    pub path: Option<String>,
    /// Explicit typename.
    pub type_name: Option<String>,
    /// Keep the result live.
    pub subscribe: bool,
    /// Read source preference.
    pub source: Source,
    /// Collection query arguments.
    pub query: QueryArgs,
}

/// The write a `@mutation` performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    Add,
    Set,
    Update,
    Delete,
}

impl MutationType {
    /// Parses a mutation type name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "add" => Some(Self::Add),
            "set" => Some(Self::Set),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Arguments of `@mutation`.
#[derive(Debug, Clone)]
pub struct MutationDirective {
    /// Dotted path; defaults to the field name.
    pub path: Option<String>,
    /// Kind of the first path segment.
    pub root_type: Option<ReferenceKind>,
    /// Explicit typename.
    pub type_name: Option<String>,
    /// The write to perform.
    pub mutation_type: Option<MutationType>,
    /// Inline payload.
    pub data_arg: Option<Value>,
    /// Name of the argument or variable holding the payload.
    pub data_var: String,
    /// Merge into the existing document on `set`.
    pub merge: bool,
    /// Only write these fields on `set`.
    pub merge_fields: Option<Vec<String>>,
}

impl Default for MutationDirective {
    fn default() -> Self {
        Self {
            path: None,
            root_type: None,
            type_name: None,
            mutation_type: None,
            data_arg: None,
            data_var: "input".to_string(),
            merge: false,
            merge_fields: None,
        }
    }
}

/// Where a leaf's exported value is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportKey {
    /// Under the given key.
    Named(String),
    /// Under the field's own name.
    FieldName,
}

impl ExportKey {
    /// Returns the key to export under for `field_name`.
    pub fn resolve<'a>(&'a self, field_name: &'a str) -> &'a str {
        match self {
            Self::Named(key) => key,
            Self::FieldName => field_name,
        }
    }
}

/// Arguments of `@field`.
#[derive(Debug, Clone, Default)]
pub struct FieldDirective {
    /// Export the value under this key.
    pub key: Option<ExportKey>,
    /// How to read pending server values.
    pub server_timestamps: ServerTimestamps,
}

/// The directive governing how a field is resolved.
#[derive(Debug, Clone)]
pub enum FieldPlan {
    Query(QueryDirective),
    Mutation(MutationDirective),
    Ref(RefDirective),
    Field(FieldDirective),
    None,
}

impl FieldPlan {
    /// Decides the plan for a field.
    ///
    /// `@query` wins over `@mutation`, which wins over `@ref`, which wins
    /// over `@field`.
    pub fn parse(field: &Field, variables: &Variables) -> LinkResult<Self> {
        if let Some(directive) = field.find_directive("query") {
            let args = ArgReader::new(directive, variables);
            return Ok(Self::Query(QueryDirective {
                path: args.string("path")?,
                root_type: args.reference_kind("rootType")?,
                type_name: args.string("type")?,
                subscribe: args.bool("subscribe")?,
                source: args.source("source")?,
                query: QueryArgs::read(&args),
            }));
        }

        if let Some(directive) = field.find_directive("mutation") {
            let args = ArgReader::new(directive, variables);
            let mutation_type = match args.string("mutationType")? {
                Some(name) => Some(MutationType::parse(&name).ok_or_else(|| {
                    LinkError::config(format!("unknown mutationType `{name}`"))
                })?),
                None => None,
            };
            return Ok(Self::Mutation(MutationDirective {
                path: args.string("path")?,
                root_type: args.reference_kind("rootType")?,
                type_name: args.string("type")?,
                mutation_type,
                data_arg: args.value("dataArg").filter(|value| !value.is_null()),
                data_var: args
                    .string("dataVar")?
                    .unwrap_or_else(|| "input".to_string()),
                merge: args.bool("merge")?,
                merge_fields: args.string_list("mergeFields")?,
            }));
        }

        if let Some(directive) = field.find_directive("ref") {
            let args = ArgReader::new(directive, variables);
            return Ok(Self::Ref(RefDirective {
                path: args.string("path")?,
                type_name: args.string("type")?,
                subscribe: args.bool("subscribe")?,
                source: args.source("source")?,
                query: QueryArgs::read(&args),
            }));
        }

        if let Some(directive) = field.find_directive("field") {
            let args = ArgReader::new(directive, variables);
            let key = match args.value("key") {
                None | Some(Value::Null | Value::Bool(false)) => None,
                Some(Value::Bool(true)) => Some(ExportKey::FieldName),
                Some(Value::String(key)) => Some(ExportKey::Named(key)),
                Some(other) => {
                    return Err(LinkError::config(format!(
                        "@field key must be a string or true, got {other}"
                    )))
                }
            };
            let server_timestamps = match args.string("serverTimestamps")? {
                Some(name) => ServerTimestamps::parse(&name).ok_or_else(|| {
                    LinkError::config(format!("unknown serverTimestamps `{name}`"))
                })?,
                None => ServerTimestamps::default(),
            };
            return Ok(Self::Field(FieldDirective {
                key,
                server_timestamps,
            }));
        }

        Ok(Self::None)
    }
}

/// Returns true if any `@query` in the operation asks for live updates.
pub fn has_subscribe_directive(operation: &Operation) -> bool {
    let subscribes = |directive: &Directive| {
        directive.name == "query"
            && matches!(
                directive.get("subscribe"),
                Some(ArgValue::Literal(Value::Bool(true)))
            )
    };

    if operation.directives.iter().any(subscribes) {
        return true;
    }
    let mut found = false;
    operation.walk(&mut |field| {
        found = found || field.directives.iter().any(subscribes);
    });
    found
}

/// Reads typed arguments off a directive.
struct ArgReader<'a> {
    directive: &'a Directive,
    variables: &'a Variables,
}

impl<'a> ArgReader<'a> {
    fn new(directive: &'a Directive, variables: &'a Variables) -> Self {
        Self {
            directive,
            variables,
        }
    }

    fn value(&self, name: &str) -> Option<Value> {
        self.directive
            .get(name)
            .and_then(|arg| arg.literal(self.variables))
    }

    fn template(&self, name: &str) -> Option<Template> {
        self.directive
            .get(name)
            .map(|arg| Template::from_arg(arg, self.variables))
    }

    fn error(&self, name: &str, expected: &str, got: &Value) -> LinkError {
        LinkError::config(format!(
            "@{}({name}:) must be {expected}, got {got}",
            self.directive.name
        ))
    }

    fn string(&self, name: &str) -> LinkResult<Option<String>> {
        match self.value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value)),
            Some(other) => Err(self.error(name, "a string", &other)),
        }
    }

    fn bool(&self, name: &str) -> LinkResult<bool> {
        match self.value(name) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(value)) => Ok(value),
            Some(other) => Err(self.error(name, "a boolean", &other)),
        }
    }

    fn string_list(&self, name: &str) -> LinkResult<Option<Vec<String>>> {
        match self.value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(value) => Ok(value),
                    other => Err(self.error(name, "a list of strings", &other)),
                })
                .collect::<LinkResult<Vec<_>>>()
                .map(Some),
            Some(other) => Err(self.error(name, "a list of strings", &other)),
        }
    }

    fn reference_kind(&self, name: &str) -> LinkResult<Option<ReferenceKind>> {
        self.string(name)?
            .map(|kind| {
                ReferenceKind::parse(&kind)
                    .ok_or_else(|| LinkError::config(format!("unknown {name} `{kind}`")))
            })
            .transpose()
    }

    fn source(&self, name: &str) -> LinkResult<Source> {
        match self.string(name)? {
            Some(source) => Source::parse(&source)
                .ok_or_else(|| LinkError::config(format!("unknown {name} `{source}`"))),
            None => Ok(Source::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::{CollectionRef, Exports};
    use serde_json::json;

    fn scope_resolve(template: &Template, exports: &Exports) -> Value {
        let reference = CollectionRef::new("users");
        template.resolve(ComputeScope {
            reference: &reference,
            exports,
        })
    }

    #[test]
    fn test_query_plan() {
        let field = Field::new("users").directive(
            Directive::new("query")
                .arg("rootType", "COLLECTION")
                .arg("subscribe", true)
                .arg("limit", 10_i64),
        );

        let FieldPlan::Query(query) = FieldPlan::parse(&field, &Variables::new()).unwrap() else {
            panic!("expected a query plan");
        };
        assert_eq!(query.root_type, Some(ReferenceKind::Collection));
        assert!(query.subscribe);
        assert_eq!(query.path, None);
        assert_eq!(query.source, Source::Default);
        assert!(query.query.limit.is_some());
        assert!(query.query.where_.is_none());
    }

    #[test]
    fn test_query_wins_over_other_directives() {
        let field = Field::new("users")
            .directive(Directive::new("field").arg("key", true))
            .directive(Directive::new("query").arg("rootType", "collection"));

        let plan = FieldPlan::parse(&field, &Variables::new()).unwrap();
        assert!(matches!(plan, FieldPlan::Query(_)));
    }

    #[test]
    fn test_mutation_plan_defaults() {
        let field = Field::new("updateItem")
            .directive(Directive::new("mutation").arg("mutationType", "update"));

        let FieldPlan::Mutation(mutation) = FieldPlan::parse(&field, &Variables::new()).unwrap()
        else {
            panic!("expected a mutation plan");
        };
        assert_eq!(mutation.mutation_type, Some(MutationType::Update));
        assert_eq!(mutation.data_var, "input");
        assert_eq!(mutation.data_arg, None);
        assert!(!mutation.merge);
    }

    #[test]
    fn test_mutation_type_is_validated() {
        let field = Field::new("updateItem")
            .directive(Directive::new("mutation").arg("mutationType", "upsert"));
        let err = FieldPlan::parse(&field, &Variables::new()).unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn test_field_key() {
        let variables = Variables::new();
        let plan = |key: ArgValue| {
            FieldPlan::parse(
                &Field::new("id").directive(Directive::new("field").arg("key", key)),
                &variables,
            )
            .unwrap()
        };

        assert!(matches!(
            plan(ArgValue::from(true)),
            FieldPlan::Field(FieldDirective { key: Some(ExportKey::FieldName), .. })
        ));
        assert!(matches!(
            plan(ArgValue::from("userId")),
            FieldPlan::Field(FieldDirective { key: Some(ExportKey::Named(key)), .. }) if key == "userId"
        ));
        assert!(matches!(
            plan(ArgValue::from(false)),
            FieldPlan::Field(FieldDirective { key: None, .. })
        ));
    }

    #[test]
    fn test_variables_are_bound() {
        let mut variables = Variables::new();
        variables.insert("kind".to_string(), json!("document"));
        let field = Field::new("settings").directive(
            Directive::new("query").arg("rootType", ArgValue::Variable("kind".to_string())),
        );

        let FieldPlan::Query(query) = FieldPlan::parse(&field, &variables).unwrap() else {
            panic!("expected a query plan");
        };
        assert_eq!(query.root_type, Some(ReferenceKind::Document));
    }

    #[test]
    fn test_ill_typed_argument() {
        let field =
            Field::new("users").directive(Directive::new("query").arg("subscribe", "yes"));
        let err = FieldPlan::parse(&field, &Variables::new()).unwrap_err();
        assert!(err.to_string().contains("subscribe"));
    }

    #[test]
    fn test_no_directive() {
        let plan = FieldPlan::parse(&Field::new("name"), &Variables::new()).unwrap();
        assert!(matches!(plan, FieldPlan::None));
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let template = Template::from_arg(&ArgValue::from("$fields{minAge}"), &Variables::new());
        let exports: Exports = [("minAge", json!(21))].into_iter().collect();

        assert_eq!(scope_resolve(&template, &exports), json!(21));
    }

    #[test]
    fn test_embedded_placeholder_is_spliced() {
        let template =
            Template::from_arg(&ArgValue::from("user-$fields{userId}"), &Variables::new());
        let exports: Exports = [("userId", json!("u1"))].into_iter().collect();

        assert_eq!(scope_resolve(&template, &exports), json!("user-u1"));
    }

    #[test]
    fn test_missing_export_leaves_placeholder() {
        let template = Template::from_arg(&ArgValue::from("$fields{minAge}"), &Variables::new());
        assert_eq!(
            scope_resolve(&template, &Exports::new()),
            json!("$fields{minAge}")
        );
    }

    #[test]
    fn test_falsy_export_still_substitutes() {
        let template = Template::from_arg(&ArgValue::from("$fields{count}"), &Variables::new());
        let exports: Exports = [("count", json!(0))].into_iter().collect();
        assert_eq!(scope_resolve(&template, &exports), json!(0));
    }

    #[test]
    fn test_object_and_list_substitution() {
        let template = Template::from_arg(
            &ArgValue::from(json!([
                {"fieldPath": "age", "op": ">=", "val": "$fields{minAge}"},
                {"fieldPath": "tags", "op": "array-contains", "val": {"nested": "$fields{minAge}"}}
            ])),
            &Variables::new(),
        );
        let exports: Exports = [("minAge", json!(21))].into_iter().collect();

        assert_eq!(
            scope_resolve(&template, &exports),
            json!([
                {"fieldPath": "age", "op": ">=", "val": 21},
                {"fieldPath": "tags", "op": "array-contains", "val": {"nested": "$fields{minAge}"}}
            ])
        );
    }

    #[test]
    fn test_computed_argument() {
        let template = Template::from_arg(
            &ArgValue::Computed(ComputedArg::new(|scope| {
                json!(format!("{}:{}", scope.reference, scope.exports.len()))
            })),
            &Variables::new(),
        );
        let exports: Exports = [("a", json!(1))].into_iter().collect();

        assert_eq!(scope_resolve(&template, &exports), json!("users:1"));
    }

    #[test]
    fn test_has_subscribe_directive() {
        let live = Operation::query().directive(Directive::new("query")).select(
            Field::new("items").directive(
                Directive::new("query")
                    .arg("rootType", "collection")
                    .arg("subscribe", true),
            ),
        );
        assert!(has_subscribe_directive(&live));

        let once = Operation::query().directive(Directive::new("query")).select(
            Field::new("items").directive(Directive::new("query").arg("rootType", "collection")),
        );
        assert!(!has_subscribe_directive(&once));
    }
}
