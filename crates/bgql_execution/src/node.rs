//! Execution node tree.
//!
//! The tree mirrors the response being built. Nodes live in an arena owned
//! by [`ExecutionTree`] and refer to their parent by [`NodeId`]. A node only
//! gets children after it has been resolved; expansion turns the resolved
//! value and the declared selection into typed child nodes.

use crate::dataloader::{BatchGroup, Deferred};
use crate::error::{ExecutionError, FieldError, PathSegment, ResolverError};
use crate::operation::{collect_fields, FieldSelection, SelectionSet};
use crate::resolver::ResolverMap;
use crate::schema::{Schema, TypeRef};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[cfg(test)]
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// The structural kind of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeShape {
    /// Scalar or enum value.
    Leaf,
    /// Children by response key, in selection order.
    Object(IndexMap<String, NodeId>),
    /// One child per list element.
    Array(Vec<NodeId>),
}

impl NodeShape {
    /// Returns the placeholder shape for a declared type.
    pub fn for_type(schema: &Schema, ty: &TypeRef) -> Self {
        if ty.list_item().is_some() {
            Self::Array(Vec::new())
        } else if schema.is_composite(ty.base_name()) {
            Self::Object(IndexMap::new())
        } else {
            Self::Leaf
        }
    }

    /// Iterates over child ids; leaves have none.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        let (fields, items) = match self {
            Self::Leaf => (None, None),
            Self::Object(fields) => (Some(fields), None),
            Self::Array(items) => (None, Some(items)),
        };
        fields
            .into_iter()
            .flat_map(|fields| fields.values().copied())
            .chain(items.into_iter().flatten().copied())
    }
}

/// Where a node is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionState {
    Pending,
    Resolving,
    /// Waiting for a batch flush. Ready values carry no group.
    Deferred(Option<BatchGroup>),
    Resolved(Arc<Value>),
    Faulted(ResolverError),
}

impl ResolutionState {
    /// Returns true once the node can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Faulted(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ResolverError> {
        match self {
            Self::Faulted(error) => Some(error),
            _ => None,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Deferred(_) => "deferred",
            Self::Resolved(_) => "resolved",
            Self::Faulted(_) => "faulted",
        }
    }
}

/// A single field, list element or the operation root.
#[derive(Debug)]
pub struct ExecutionNode {
    pub(crate) parent: Option<NodeId>,
    pub(crate) segment: Option<PathSegment>,
    pub(crate) field: Arc<FieldSelection>,
    /// Concrete type of the object this field is selected on.
    pub(crate) parent_type: Arc<str>,
    pub(crate) declared: TypeRef,
    pub(crate) shape: NodeShape,
    pub(crate) state: ResolutionState,
    pub(crate) placeholder: Option<Deferred>,
    /// Value known without calling a resolver.
    pub(crate) source: Option<Arc<Value>>,
    pub(crate) object_type: Option<Arc<str>>,
}

impl ExecutionNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn field(&self) -> &FieldSelection {
        &self.field
    }

    pub fn parent_type(&self) -> &str {
        &self.parent_type
    }

    pub fn declared_type(&self) -> &TypeRef {
        &self.declared
    }

    pub fn shape(&self) -> &NodeShape {
        &self.shape
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    /// Concrete object type, known once an object node has been expanded.
    pub fn object_type(&self) -> Option<&str> {
        self.object_type.as_deref()
    }

    /// Returns true if this node is a list element rather than a field.
    pub fn is_list_item(&self) -> bool {
        matches!(self.segment, Some(PathSegment::Index(_)))
    }
}

/// Arena of execution nodes for one run.
#[derive(Debug)]
pub struct ExecutionTree {
    nodes: Vec<ExecutionNode>,
}

impl ExecutionTree {
    /// Creates a tree whose root is already resolved to `root_value`.
    pub fn new(root_type: &str, selection_set: SelectionSet, root_value: Value) -> Self {
        let root_type: Arc<str> = Arc::from(root_type);
        let root = ExecutionNode {
            parent: None,
            segment: None,
            field: Arc::new(FieldSelection::new(root_type.as_ref()).select(selection_set)),
            parent_type: Arc::clone(&root_type),
            declared: TypeRef::named(root_type.as_ref()),
            shape: NodeShape::Object(IndexMap::new()),
            state: ResolutionState::Pending,
            placeholder: None,
            source: Some(Arc::new(root_value)),
            object_type: None,
        };
        Self { nodes: vec![root] }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &ExecutionNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut ExecutionNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over every node in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ExecutionNode)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    /// Returns the child of an object node by response key.
    pub fn child(&self, id: NodeId, key: &str) -> Option<NodeId> {
        match &self.node(id).shape {
            NodeShape::Object(fields) => fields.get(key).copied(),
            _ => None,
        }
    }

    /// Follows a path of response keys and list indices from the root.
    pub fn find(&self, path: &[PathSegment]) -> Option<NodeId> {
        path.iter().try_fold(self.root(), |id, segment| match (segment, &self.node(id).shape) {
            (PathSegment::Field(key), NodeShape::Object(fields)) => fields.get(key).copied(),
            (PathSegment::Index(i), NodeShape::Array(items)) => items.get(*i).copied(),
            _ => None,
        })
    }

    /// Returns the response path of a node.
    pub fn path(&self, id: NodeId) -> Vec<PathSegment> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.node(id);
            if let Some(segment) = &node.segment {
                path.push(segment.clone());
            }
            current = node.parent;
        }
        path.reverse();
        path
    }

    /// Returns true if every node reachable from the root is resolved or faulted.
    pub fn is_complete(&self) -> bool {
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if !node.state.is_terminal() {
                return false;
            }
            stack.extend(node.shape.children());
        }
        true
    }

    /// Collects the faults of all nodes with their paths.
    pub fn errors(&self) -> Vec<FieldError> {
        self.iter()
            .filter_map(|(id, node)| {
                node.state
                    .error()
                    .map(|error| FieldError::from(error.clone()).with_path(self.path(id)))
            })
            .collect()
    }

    /// Materializes the children of a resolved node.
    ///
    /// New children that still need resolving are pushed to `ready` in
    /// selection order. A value that does not fit the declared type faults
    /// the node instead of producing children.
    pub(crate) fn expand(
        &mut self,
        id: NodeId,
        schema: &Schema,
        resolvers: &ResolverMap,
        ready: &mut impl Extend<NodeId>,
    ) -> Result<(), ExecutionError> {
        let node = self.node(id);
        let value = match &node.state {
            ResolutionState::Resolved(value) => Arc::clone(value),
            other => {
                return Err(ExecutionError::Invariant(format!(
                    "cannot expand {} node at {:?}",
                    other.label(),
                    self.path(id)
                )));
            }
        };
        if value.is_null() {
            return Ok(());
        }

        let is_object = match &node.shape {
            NodeShape::Leaf => return Ok(()),
            NodeShape::Object(_) => true,
            NodeShape::Array(_) => false,
        };
        let expanded = if is_object {
            self.expand_object(id, &value, schema, resolvers)
        } else {
            self.expand_array(id, &value, schema)
        };
        match expanded {
            Ok(children) => {
                ready.extend(children);
                Ok(())
            }
            Err(error) => {
                self.node_mut(id).state = ResolutionState::Faulted(error);
                Ok(())
            }
        }
    }

    fn expand_object(
        &mut self,
        id: NodeId,
        value: &Value,
        schema: &Schema,
        resolvers: &ResolverMap,
    ) -> Result<Vec<NodeId>, ResolverError> {
        let node = self.node(id);
        if !value.is_object() {
            return Err(unexpected(&node.field, "object", value));
        }

        let declared = node.declared.base_name();
        let concrete: Arc<str> = if schema.is_abstract(declared) {
            resolvers
                .resolve_type(declared, value)
                .filter(|ty| schema.is_possible_type(declared, ty))
                .map(Arc::from)
                .ok_or_else(|| ResolverError::AbstractType(declared.to_string()))?
        } else {
            Arc::from(declared)
        };

        let fields = collect_fields(schema, &concrete, &node.field.selection_set);
        let mut children = IndexMap::with_capacity(fields.len());
        let mut ready = Vec::with_capacity(fields.len());
        for (key, field) in fields {
            let definition = if field.name == "__typename" {
                Some(TypeRef::named("String"))
            } else {
                schema.field(&concrete, &field.name).map(|def| def.ty.clone())
            };
            let (declared, state) = match definition {
                Some(ty) => (ty, ResolutionState::Pending),
                None => (
                    TypeRef::option(TypeRef::named("String")),
                    ResolutionState::Faulted(ResolverError::FieldNotFound {
                        type_name: concrete.to_string(),
                        field: field.name.clone(),
                    }),
                ),
            };
            let pending = matches!(state, ResolutionState::Pending);
            let child = self.push(ExecutionNode {
                parent: Some(id),
                segment: Some(PathSegment::Field(key.clone())),
                shape: NodeShape::for_type(schema, &declared),
                field,
                parent_type: Arc::clone(&concrete),
                declared,
                state,
                placeholder: None,
                source: None,
                object_type: None,
            });
            if pending {
                ready.push(child);
            }
            children.insert(key, child);
        }

        let node = self.node_mut(id);
        node.shape = NodeShape::Object(children);
        node.object_type = Some(concrete);
        Ok(ready)
    }

    fn expand_array(
        &mut self,
        id: NodeId,
        value: &Value,
        schema: &Schema,
    ) -> Result<Vec<NodeId>, ResolverError> {
        let node = self.node(id);
        let Value::Array(items) = value else {
            return Err(unexpected(&node.field, "list", value));
        };
        let Some(item_type) = node.declared.list_item().cloned() else {
            return Err(unexpected(&node.field, "list type", value));
        };

        let field = Arc::clone(&node.field);
        let parent_type = Arc::clone(&node.parent_type);
        let shape = NodeShape::for_type(schema, &item_type);
        let children: Vec<NodeId> = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                self.push(ExecutionNode {
                    parent: Some(id),
                    segment: Some(PathSegment::Index(index)),
                    field: Arc::clone(&field),
                    parent_type: Arc::clone(&parent_type),
                    declared: item_type.clone(),
                    shape: shape.clone(),
                    state: ResolutionState::Pending,
                    placeholder: None,
                    source: Some(Arc::new(item.clone())),
                    object_type: None,
                })
            })
            .collect();

        self.node_mut(id).shape = NodeShape::Array(children.clone());
        Ok(children)
    }

    fn push(&mut self, node: ExecutionNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }
}

fn unexpected(field: &FieldSelection, expected: &'static str, value: &Value) -> ResolverError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    };
    ResolverError::UnexpectedValue {
        field: field.name.clone(),
        expected,
        found: found.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{InterfaceDef, ObjectDef, SchemaBuilder};

    fn schema() -> Schema {
        SchemaBuilder::new()
            .query_type("Query")
            .interface(InterfaceDef::new("Character").field("name", TypeRef::named("String")))
            .object(
                ObjectDef::new("Droid")
                    .field("name", TypeRef::named("String"))
                    .field("friends", TypeRef::list(TypeRef::named("Character")))
                    .implements("Character"),
            )
            .object(
                ObjectDef::new("Query")
                    .field("hero", TypeRef::option(TypeRef::named("Character")))
                    .field("version", TypeRef::named("String")),
            )
            .build()
    }

    fn resolve(tree: &mut ExecutionTree, id: NodeId, value: Value) {
        tree.node_mut(id).state = ResolutionState::Resolved(Arc::new(value));
    }

    fn query() -> SelectionSet {
        SelectionSet::new()
            .field(FieldSelection::new("hero").select(
                SelectionSet::new().fields(&["__typename", "name", "height"]).field(
                    FieldSelection::new("friends").select(SelectionSet::new().fields(&["name"])),
                ),
            ))
            .fields(&["version"])
    }

    #[test]
    fn test_shape_children() {
        let mut fields = IndexMap::new();
        fields.insert("a".to_string(), NodeId(1));
        fields.insert("b".to_string(), NodeId(2));

        assert_eq!(NodeShape::Leaf.children().count(), 0);
        assert_eq!(
            NodeShape::Object(fields).children().collect::<Vec<_>>(),
            vec![NodeId(1), NodeId(2)]
        );
        assert_eq!(
            NodeShape::Array(vec![NodeId(3)]).children().collect::<Vec<_>>(),
            vec![NodeId(3)]
        );
    }

    #[test]
    fn test_expand_pending_node_is_invariant_violation() {
        let schema = schema();
        let mut tree = ExecutionTree::new("Query", query(), Value::Null);
        let mut ready = Vec::new();

        let result = tree.expand(tree.root(), &schema, &ResolverMap::new(), &mut ready);
        assert!(matches!(result, Err(ExecutionError::Invariant(_))));
        assert!(ready.is_empty());
    }

    #[test]
    fn test_expand_object_and_array() {
        let schema = schema();
        let resolvers = ResolverMap::new();
        let mut tree = ExecutionTree::new("Query", query(), serde_json::json!({}));
        let root = tree.root();
        resolve(&mut tree, root, serde_json::json!({}));

        let mut ready = Vec::new();
        tree.expand(root, &schema, &resolvers, &mut ready).unwrap();
        assert_eq!(ready.len(), 2);
        let hero = tree.child(root, "hero").unwrap();
        assert_eq!(tree.path(hero), vec![PathSegment::from("hero")]);

        resolve(
            &mut tree,
            hero,
            serde_json::json!({"__typename": "Droid", "name": "R2-D2"}),
        );
        ready.clear();
        tree.expand(hero, &schema, &resolvers, &mut ready).unwrap();
        assert_eq!(tree.node(hero).object_type(), Some("Droid"));
        // `height` is not a Droid field and faults without being scheduled.
        assert_eq!(ready.len(), 3);
        let height = tree.child(hero, "height").unwrap();
        assert!(matches!(
            tree.node(height).state(),
            ResolutionState::Faulted(ResolverError::FieldNotFound { .. })
        ));

        let friends = tree.child(hero, "friends").unwrap();
        resolve(&mut tree, friends, serde_json::json!([{"name": "Luke"}, {"name": "Han"}]));
        ready.clear();
        tree.expand(friends, &schema, &resolvers, &mut ready).unwrap();
        assert_eq!(ready.len(), 2);
        assert_eq!(
            tree.path(ready[1]),
            vec![PathSegment::from("hero"), PathSegment::from("friends"), PathSegment::from(1)]
        );
        assert!(tree.node(ready[1]).is_list_item());
        assert_eq!(
            tree.find(&[PathSegment::from("hero"), PathSegment::from("friends"), PathSegment::from(0)]),
            Some(ready[0])
        );
    }

    #[test]
    fn test_unresolvable_abstract_type_faults_node() {
        let schema = schema();
        let mut tree = ExecutionTree::new("Query", query(), serde_json::json!({}));
        let root = tree.root();
        resolve(&mut tree, root, serde_json::json!({}));
        let mut ready = Vec::new();
        tree.expand(root, &schema, &ResolverMap::new(), &mut ready).unwrap();

        let hero = tree.child(root, "hero").unwrap();
        resolve(&mut tree, hero, serde_json::json!({"name": "Mystery"}));
        ready.clear();
        tree.expand(hero, &schema, &ResolverMap::new(), &mut ready).unwrap();

        assert!(ready.is_empty());
        assert_eq!(
            tree.node(hero).state(),
            &ResolutionState::Faulted(ResolverError::AbstractType("Character".to_string()))
        );
        assert_eq!(tree.node(hero).shape().children().count(), 0);
        assert_eq!(tree.errors().len(), 1);
    }

    #[test]
    fn test_non_list_value_faults_array_node() {
        let schema = schema();
        let mut tree = ExecutionTree::new("Query", query(), serde_json::json!({}));
        let root = tree.root();
        resolve(&mut tree, root, serde_json::json!({}));
        let mut ready = Vec::new();
        tree.expand(root, &schema, &ResolverMap::new(), &mut ready).unwrap();
        let hero = tree.child(root, "hero").unwrap();
        resolve(&mut tree, hero, serde_json::json!({"__typename": "Droid"}));
        tree.expand(hero, &schema, &ResolverMap::new(), &mut ready).unwrap();

        let friends = tree.child(hero, "friends").unwrap();
        resolve(&mut tree, friends, serde_json::json!("nobody"));
        tree.expand(friends, &schema, &ResolverMap::new(), &mut ready).unwrap();
        assert!(matches!(
            tree.node(friends).state(),
            ResolutionState::Faulted(ResolverError::UnexpectedValue { expected: "list", .. })
        ));
    }
}
