//! Deferred batch classification.
//!
//! Decides which deferred nodes to flush first. A deferred node whose
//! selection can reach a type that another deferred node produces is
//! flushed ahead of the rest, so the batches it unlocks get to join the
//! keys that are already waiting.

use crate::node::{ExecutionTree, NodeId};
use crate::operation::{collect_fields, SelectionSet};
use crate::schema::{Schema, TypeRef};
use rustc_hash::FxHashSet;

/// Plans deferred flushes from declared types and selections alone.
#[derive(Debug, Clone, Copy)]
pub struct DeferredClassifier<'a> {
    schema: &'a Schema,
}

impl<'a> DeferredClassifier<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Object types a value of `ty` can be at runtime.
    ///
    /// Lists unwrap to their item type. Scalars and enums yield nothing.
    pub fn concrete_types(&self, ty: &TypeRef) -> Vec<&'a str> {
        self.schema.possible_types(ty.base_name())
    }

    /// Returns true if some field below `selection`, at any depth, can
    /// produce one of `targets`. The node's own type is not considered.
    pub fn has_child_of_graph_type(
        &self,
        ty: &TypeRef,
        selection: &SelectionSet,
        targets: &FxHashSet<&str>,
    ) -> bool {
        if selection.is_empty() || targets.is_empty() {
            return false;
        }
        self.concrete_types(ty).into_iter().any(|object_type| {
            collect_fields(self.schema, object_type, selection)
                .values()
                .any(|field| {
                    let Some(definition) = self.schema.field(object_type, &field.name) else {
                        return false;
                    };
                    self.concrete_types(&definition.ty)
                        .iter()
                        .any(|ty| targets.contains(ty))
                        || self.has_child_of_graph_type(
                            &definition.ty,
                            &field.selection_set,
                            targets,
                        )
                })
        })
    }

    /// Returns the deferred nodes to flush ahead of the others, in order.
    ///
    /// An empty result means nothing qualifies and everything should be
    /// flushed together.
    pub fn prioritize(&self, tree: &ExecutionTree, deferred: &[NodeId]) -> Vec<NodeId> {
        let targets: FxHashSet<&str> = deferred
            .iter()
            .flat_map(|id| self.concrete_types(tree.node(*id).declared_type()))
            .collect();

        deferred
            .iter()
            .copied()
            .filter(|id| {
                let node = tree.node(*id);
                self.has_child_of_graph_type(
                    node.declared_type(),
                    &node.field().selection_set,
                    &targets,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::FieldSelection;
    use crate::schema::{InterfaceDef, ObjectDef, SchemaBuilder};

    fn schema() -> Schema {
        SchemaBuilder::new()
            .query_type("Query")
            .interface(
                InterfaceDef::new("Character")
                    .field("name", TypeRef::named("String"))
                    .field("friends", TypeRef::list(TypeRef::named("Character"))),
            )
            .object(
                ObjectDef::new("Human")
                    .field("name", TypeRef::named("String"))
                    .field("friends", TypeRef::list(TypeRef::named("Character")))
                    .implements("Character"),
            )
            .object(
                ObjectDef::new("Droid")
                    .field("name", TypeRef::named("String"))
                    .field("owner", TypeRef::option(TypeRef::named("Human")))
                    .field("friends", TypeRef::list(TypeRef::named("Character")))
                    .implements("Character"),
            )
            .object(ObjectDef::new("Query").field("droid", TypeRef::named("Droid")))
            .build()
    }

    fn names() -> SelectionSet {
        SelectionSet::new().fields(&["name"])
    }

    fn set<'a>(types: &[&'a str]) -> FxHashSet<&'a str> {
        types.iter().copied().collect()
    }

    #[test]
    fn test_concrete_types() {
        let schema = schema();
        let classifier = DeferredClassifier::new(&schema);

        let friends = TypeRef::option(TypeRef::list(TypeRef::named("Character")));
        assert_eq!(classifier.concrete_types(&friends), vec!["Human", "Droid"]);
        assert_eq!(classifier.concrete_types(&TypeRef::named("Droid")), vec!["Droid"]);
        assert!(classifier.concrete_types(&TypeRef::named("String")).is_empty());
    }

    #[test]
    fn test_has_child_of_graph_type() {
        let schema = schema();
        let classifier = DeferredClassifier::new(&schema);
        let owner = TypeRef::option(TypeRef::named("Human"));

        let with_friends =
            SelectionSet::new().field(FieldSelection::new("friends").select(names()));
        assert!(classifier.has_child_of_graph_type(&owner, &with_friends, &set(&["Droid"])));
        assert!(!classifier.has_child_of_graph_type(&owner, &names(), &set(&["Human", "Droid"])));

        // The node's own type does not count, only what lies below it.
        let friends = TypeRef::list(TypeRef::named("Character"));
        assert!(!classifier.has_child_of_graph_type(&friends, &names(), &set(&["Human"])));
    }

    #[test]
    fn test_has_child_follows_nested_selections() {
        let schema = schema();
        let classifier = DeferredClassifier::new(&schema);

        let selection = SelectionSet::new().on(
            "Droid",
            SelectionSet::new().field(
                FieldSelection::new("owner")
                    .select(SelectionSet::new().field(FieldSelection::new("friends").select(names()))),
            ),
        );
        let character = TypeRef::named("Character");
        assert!(classifier.has_child_of_graph_type(&character, &selection, &set(&["Droid"])));

        let human_only = SelectionSet::new().on("Human", names());
        assert!(!classifier.has_child_of_graph_type(&character, &human_only, &set(&["Droid", "Human"])));
    }
}
