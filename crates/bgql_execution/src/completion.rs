//! Response completion.
//!
//! Turns a finished [`ExecutionTree`] into response data and errors. A
//! null in a non-null position (from a fault or a resolved null) makes the
//! nearest nullable ancestor null instead; when that reaches the root the
//! whole data is null.

use crate::error::FieldError;
use crate::node::{ExecutionTree, NodeId, NodeShape, ResolutionState};
use serde_json::{Map, Value};

/// Marks a null that has to propagate to the parent.
struct InvalidNull;

/// Builds response data and errors from a tree.
///
/// Errors are listed in depth-first selection order.
pub fn complete_response(tree: &ExecutionTree) -> (Option<Value>, Vec<FieldError>) {
    let mut errors = Vec::new();
    let data = complete_node(tree, tree.root(), &mut errors).ok();
    (data, errors)
}

fn complete_node(
    tree: &ExecutionTree,
    id: NodeId,
    errors: &mut Vec<FieldError>,
) -> Result<Value, InvalidNull> {
    let node = tree.node(id);
    let completed = match node.state() {
        ResolutionState::Faulted(error) => {
            errors.push(FieldError::from(error.clone()).with_path(tree.path(id)));
            None
        }
        ResolutionState::Resolved(value) if value.is_null() => Some(Value::Null),
        ResolutionState::Resolved(value) => match node.shape() {
            NodeShape::Leaf => Some(value.as_ref().clone()),
            NodeShape::Object(fields) => {
                let mut object = Map::with_capacity(fields.len());
                let mut valid = true;
                for (key, child) in fields {
                    match complete_node(tree, *child, errors) {
                        Ok(value) => {
                            object.insert(key.clone(), value);
                        }
                        Err(InvalidNull) => valid = false,
                    }
                }
                valid.then_some(Value::Object(object))
            }
            NodeShape::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                let mut valid = true;
                for item in items {
                    match complete_node(tree, *item, errors) {
                        Ok(value) => list.push(value),
                        Err(InvalidNull) => valid = false,
                    }
                }
                valid.then_some(Value::Array(list))
            }
        },
        // Never finished, only after a cancelled run.
        _ => Some(Value::Null),
    };

    let nullable = node.declared_type().is_nullable();
    match completed {
        Some(Value::Null) if !nullable => {
            let name = &node.field().name;
            errors.push(
                FieldError::new(format!(
                    "Cannot return null for non-nullable field {}.{name}",
                    node.parent_type()
                ))
                .with_path(tree.path(id)),
            );
            Err(InvalidNull)
        }
        Some(value) => Ok(value),
        None if nullable => Ok(Value::Null),
        None => Err(InvalidNull),
    }
}
