//! Operations and selection sets.
//!
//! The operation arrives already parsed and validated; this module only
//! models its selections and flattens them against concrete object types.

use crate::schema::Schema;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// Operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

/// An executable operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub selection_set: SelectionSet,
}

impl Operation {
    /// Creates a query operation.
    pub fn query(selection_set: SelectionSet) -> Self {
        Self {
            kind: OperationKind::Query,
            name: None,
            selection_set,
        }
    }

    /// Creates a mutation operation.
    pub fn mutation(selection_set: SelectionSet) -> Self {
        Self {
            kind: OperationKind::Mutation,
            name: None,
            selection_set,
        }
    }

    /// Sets the operation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A selection set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSet {
    pub items: Vec<Selection>,
}

impl SelectionSet {
    /// Creates an empty selection set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field selection.
    pub fn field(mut self, field: FieldSelection) -> Self {
        self.items.push(Selection::Field(Arc::new(field)));
        self
    }

    /// Adds leaf fields by name.
    pub fn fields(mut self, names: &[&str]) -> Self {
        for name in names {
            self.items
                .push(Selection::Field(Arc::new(FieldSelection::new(*name))));
        }
        self
    }

    /// Adds an inline fragment with a type condition.
    pub fn on(mut self, type_condition: impl Into<String>, selection_set: SelectionSet) -> Self {
        self.items.push(Selection::InlineFragment(InlineFragment {
            type_condition: Some(type_condition.into()),
            selection_set,
        }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Arc<FieldSelection>),
    InlineFragment(InlineFragment),
}

/// An inline fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub selection_set: SelectionSet,
}

/// A selected field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSelection {
    pub name: String,
    pub alias: Option<String>,
    /// Argument values with variables already substituted.
    pub arguments: IndexMap<String, Value>,
    pub selection_set: SelectionSet,
}

impl FieldSelection {
    /// Creates a field selection without arguments or sub-selections.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: IndexMap::new(),
            selection_set: SelectionSet::new(),
        }
    }

    /// Sets the alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds an argument.
    pub fn arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    /// Sets the sub-selection.
    pub fn select(mut self, selection_set: SelectionSet) -> Self {
        self.selection_set = selection_set;
        self
    }

    /// Returns the key this field is written under in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Flattens a selection set for a concrete object type.
///
/// Inline fragments apply when their type condition is the object type or
/// an abstract type it belongs to. Fields sharing a response key are merged
/// into one selection whose sub-selections are concatenated, keeping the
/// position of the first occurrence.
pub fn collect_fields(
    schema: &Schema,
    object_type: &str,
    selection_set: &SelectionSet,
) -> IndexMap<String, Arc<FieldSelection>> {
    let mut grouped: IndexMap<String, Vec<Arc<FieldSelection>>> = IndexMap::new();
    collect_into(schema, object_type, selection_set, &mut grouped);

    grouped
        .into_iter()
        .map(|(key, mut fields)| {
            let field = if fields.len() == 1 {
                fields.swap_remove(0)
            } else {
                let mut merged = (*fields[0]).clone();
                for other in &fields[1..] {
                    merged
                        .selection_set
                        .items
                        .extend(other.selection_set.items.iter().cloned());
                }
                Arc::new(merged)
            };
            (key, field)
        })
        .collect()
}

fn collect_into(
    schema: &Schema,
    object_type: &str,
    selection_set: &SelectionSet,
    grouped: &mut IndexMap<String, Vec<Arc<FieldSelection>>>,
) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => grouped
                .entry(field.response_key().to_string())
                .or_default()
                .push(Arc::clone(field)),
            Selection::InlineFragment(fragment) => {
                let applies = fragment
                    .type_condition
                    .as_deref()
                    .map_or(true, |condition| schema.is_possible_type(condition, object_type));
                if applies {
                    collect_into(schema, object_type, &fragment.selection_set, grouped);
                }
            }
        }
    }
}
