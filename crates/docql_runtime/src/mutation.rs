//! Writes requested by `@mutation`.

use crate::backend::{Backend, SetOptions, Source};
use crate::directives::{MutationDirective, MutationType};
use crate::executor::{Resolved, ResolverRoot};
use crate::reference::resolve_reference;
use crate::snapshot::DocumentData;
use docql_core::{resolve_typename, Field, LinkError, LinkResult, Reference, Variables};
use serde_json::Value;
use tracing::debug;

/// Finds the payload of a mutation.
///
/// Looks at `dataArg` first, then the field argument named by `dataVar`,
/// then the operation variable of that name.
pub fn mutation_payload(
    field: &Field,
    directive: &MutationDirective,
    variables: &Variables,
) -> LinkResult<DocumentData> {
    let payload = directive
        .data_arg
        .clone()
        .or_else(|| {
            field
                .arguments
                .get(&directive.data_var)
                .and_then(|arg| arg.literal(variables))
                .filter(|value| !value.is_null())
        })
        .or_else(|| variables.get(&directive.data_var).cloned())
        .ok_or_else(|| {
            LinkError::config(format!(
                "no mutation payload: set dataArg or pass `{}`",
                directive.data_var
            ))
        })?;

    match payload {
        Value::Object(data) => Ok(data),
        other => Err(LinkError::config(format!(
            "mutation payload must be an object, got {other}"
        ))),
    }
}

/// Rejects mutation types the reference cannot take.
///
/// A collection only accepts `add`; a document accepts everything else.
pub fn check_compatibility(reference: &Reference, mutation_type: MutationType) -> LinkResult<()> {
    match (reference, mutation_type) {
        (Reference::Collection(_), MutationType::Add)
        | (Reference::Document(_), MutationType::Set | MutationType::Update | MutationType::Delete) => {
            Ok(())
        }
        (Reference::Collection(collection), other) => Err(LinkError::invalid_mutation(format!(
            "{other:?} needs a document, but `{collection}` is a collection"
        ))),
        (Reference::Document(document), _) => Err(LinkError::invalid_mutation(format!(
            "Add needs a collection, but `{document}` is a document"
        ))),
    }
}

/// Resolves the reference a mutation writes to.
///
/// Anything other than `add` aimed at a collection is narrowed to the
/// document named by the payload's `id`.
pub fn mutation_target<B: Backend + ?Sized>(
    client: &B,
    field: &Field,
    directive: &MutationDirective,
    mutation_type: MutationType,
    payload: &DocumentData,
) -> LinkResult<Reference> {
    let path = directive.path.as_deref().unwrap_or(&field.name);
    let reference = resolve_reference(client, path, directive.root_type)?;

    let reference = match reference {
        Reference::Collection(collection) if mutation_type != MutationType::Add => {
            let id = payload.get("id").and_then(Value::as_str).ok_or_else(|| {
                LinkError::config(format!(
                    "{mutation_type:?} on collection `{collection}` needs a string `id` in the payload"
                ))
            })?;
            Reference::Document(collection.doc(id))
        }
        other => other,
    };

    check_compatibility(&reference, mutation_type)?;
    Ok(reference)
}

/// Performs the write and re-reads the written document.
pub(crate) async fn execute_mutation<B: Backend + ?Sized>(
    client: &B,
    field: &Field,
    directive: &MutationDirective,
    variables: &Variables,
) -> LinkResult<Resolved> {
    let mutation_type = directive
        .mutation_type
        .ok_or_else(|| LinkError::config("mutationType is required"))?;
    let payload = mutation_payload(field, directive, variables)?;
    let typename = resolve_typename(directive.type_name.as_deref(), &field.name);

    let target = mutation_target(client, field, directive, mutation_type, &payload)?;
    let document = match (target, mutation_type) {
        (Reference::Collection(collection), _) => {
            debug!(collection = %collection, "adding document");
            client.add(&collection, payload).await?
        }
        (Reference::Document(document), MutationType::Set) => {
            let options = match &directive.merge_fields {
                Some(fields) => SetOptions::merge_fields(fields.clone()),
                None if directive.merge => SetOptions::merge(),
                None => SetOptions::replace(),
            };
            debug!(document = %document, merge = options.merge, "setting document");
            client.set(&document, payload, &options).await?;
            document
        }
        (Reference::Document(document), MutationType::Update) => {
            debug!(document = %document, "updating document");
            client.update(&document, payload).await?;
            document
        }
        (Reference::Document(document), MutationType::Delete) => {
            debug!(document = %document, "deleting document");
            client.delete(&document).await?;
            return Ok(Resolved::Deleted {
                typename,
                id: document.id().to_string(),
            });
        }
        (Reference::Document(document), MutationType::Add) => {
            return Err(LinkError::invalid_mutation(format!(
                "Add needs a collection, but `{document}` is a document"
            )))
        }
    };

    let snapshot = client.get_document(&document, Source::Default).await?;
    Ok(Resolved::Entity(ResolverRoot { typename, snapshot }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use docql_core::{ArgValue, CollectionRef, DocumentRef, ReferenceKind};
    use serde_json::json;

    fn directive(mutation_type: MutationType, root_type: ReferenceKind) -> MutationDirective {
        MutationDirective {
            path: Some("users".to_string()),
            root_type: Some(root_type),
            mutation_type: Some(mutation_type),
            ..MutationDirective::default()
        }
    }

    fn data(value: Value) -> DocumentData {
        match value {
            Value::Object(data) => data,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_payload_lookup_order() {
        let mut variables = Variables::new();
        variables.insert("input".to_string(), json!({"from": "variables"}));
        variables.insert("other".to_string(), json!({"from": "argument"}));
        let mut directive = directive(MutationType::Set, ReferenceKind::Collection);

        let bare = Field::new("user");
        assert_eq!(
            mutation_payload(&bare, &directive, &variables).unwrap(),
            data(json!({"from": "variables"}))
        );

        let with_arg = Field::new("user").arg("input", ArgValue::Variable("other".to_string()));
        assert_eq!(
            mutation_payload(&with_arg, &directive, &variables).unwrap(),
            data(json!({"from": "argument"}))
        );

        directive.data_arg = Some(json!({"from": "dataArg"}));
        assert_eq!(
            mutation_payload(&with_arg, &directive, &variables).unwrap(),
            data(json!({"from": "dataArg"}))
        );
    }

    #[test]
    fn test_payload_required() {
        let directive = directive(MutationType::Set, ReferenceKind::Collection);
        let err = mutation_payload(&Field::new("user"), &directive, &Variables::new()).unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));

        let mut variables = Variables::new();
        variables.insert("input".to_string(), json!("not an object"));
        let err = mutation_payload(&Field::new("user"), &directive, &variables).unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn test_compatibility() {
        let collection = Reference::Collection(CollectionRef::new("users"));
        let document = Reference::Document(DocumentRef::new("users/u1"));

        assert!(check_compatibility(&collection, MutationType::Add).is_ok());
        assert!(check_compatibility(&document, MutationType::Update).is_ok());
        for mutation_type in [MutationType::Set, MutationType::Update, MutationType::Delete] {
            assert!(matches!(
                check_compatibility(&collection, mutation_type),
                Err(LinkError::InvalidMutation(_))
            ));
        }
        assert!(matches!(
            check_compatibility(&document, MutationType::Add),
            Err(LinkError::InvalidMutation(_))
        ));
    }

    #[test]
    fn test_target_narrowed_by_id() {
        let client = MemoryBackend::new();
        let field = Field::new("user");
        let payload = data(json!({"id": "u1", "key": "v2"}));

        let target = mutation_target(
            &client,
            &field,
            &directive(MutationType::Update, ReferenceKind::Collection),
            MutationType::Update,
            &payload,
        )
        .unwrap();
        assert_eq!(target, Reference::Document(DocumentRef::new("users/u1")));

        let err = mutation_target(
            &client,
            &field,
            &directive(MutationType::Delete, ReferenceKind::Collection),
            MutationType::Delete,
            &data(json!({"key": "v2"})),
        )
        .unwrap_err();
        assert!(matches!(err, LinkError::Config(message) if message.contains("`id`")));
    }

    #[tokio::test]
    async fn test_set_then_reread() {
        let client = MemoryBackend::new();
        let mut variables = Variables::new();
        variables.insert("input".to_string(), json!({"id": "u1", "key": "v2"}));

        let resolved = execute_mutation(
            &client,
            &Field::new("user"),
            &directive(MutationType::Set, ReferenceKind::Collection),
            &variables,
        )
        .await
        .unwrap();

        let Resolved::Entity(root) = resolved else {
            panic!("expected an entity");
        };
        assert_eq!(root.typename, "User");
        assert_eq!(root.snapshot.id(), "u1");
        assert_eq!(root.snapshot.get("key", Default::default()), json!("v2"));
    }

    #[tokio::test]
    async fn test_add_returns_new_document() {
        let client = MemoryBackend::new();
        let mut directive = directive(MutationType::Add, ReferenceKind::Collection);
        directive.data_arg = Some(json!({"name": "Eve"}));

        let Resolved::Entity(root) =
            execute_mutation(&client, &Field::new("addUser"), &directive, &Variables::new())
                .await
                .unwrap()
        else {
            panic!("expected an entity");
        };
        assert!(root.snapshot.exists());
        assert_eq!(root.typename, "AddUser");
        assert_eq!(root.snapshot.get("name", Default::default()), json!("Eve"));
    }

    #[tokio::test]
    async fn test_delete_skips_reread() {
        let client = MemoryBackend::with_seed(&json!({"users": {"u1": {"name": "Alice"}}})).unwrap();
        let mut directive = directive(MutationType::Delete, ReferenceKind::Collection);
        directive.data_arg = Some(json!({"id": "u1"}));
        directive.type_name = Some("User".to_string());

        let resolved =
            execute_mutation(&client, &Field::new("removeUser"), &directive, &Variables::new())
                .await
                .unwrap();
        assert_eq!(
            resolved,
            Resolved::Deleted {
                typename: "User".to_string(),
                id: "u1".to_string(),
            }
        );
        let snapshot = client
            .get_document(&DocumentRef::new("users/u1"), Source::Default)
            .await
            .unwrap();
        assert!(!snapshot.exists());
    }

    #[tokio::test]
    async fn test_mutation_type_required() {
        let client = MemoryBackend::new();
        let directive = MutationDirective {
            data_arg: Some(json!({"id": "u1"})),
            root_type: Some(ReferenceKind::Collection),
            ..MutationDirective::default()
        };

        let err = execute_mutation(&client, &Field::new("users"), &directive, &Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Config(message) if message.contains("mutationType")));
    }
}
