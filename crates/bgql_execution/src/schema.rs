//! Schema definition for execution.
//!
//! Only the parts of a schema that execution needs: named types, field
//! definitions and the abstract-type relationships used to expand interfaces
//! and unions into their possible object types.

use crate::operation::OperationKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A GraphQL schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub name: Option<String>,
    pub description: Option<String>,
    pub query_type: Option<String>,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
    pub types: IndexMap<String, TypeDef>,
}

impl Schema {
    /// Creates a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a type by name.
    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Returns all types.
    pub fn types(&self) -> impl Iterator<Item = (&String, &TypeDef)> {
        self.types.iter()
    }

    /// Returns the root type name for an operation kind.
    pub fn root_type(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => self.query_type.as_deref(),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    /// Looks up a field definition on an object or interface type.
    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        match self.types.get(type_name)? {
            TypeDef::Object(o) => o.fields.get(field_name),
            TypeDef::Interface(i) => i.fields.get(field_name),
            _ => None,
        }
    }

    /// Returns true if values of this named type have sub-selections.
    pub fn is_composite(&self, name: &str) -> bool {
        matches!(
            self.types.get(name),
            Some(TypeDef::Object(_) | TypeDef::Interface(_) | TypeDef::Union(_))
        )
    }

    /// Returns true if the named type is an interface or union.
    pub fn is_abstract(&self, name: &str) -> bool {
        matches!(
            self.types.get(name),
            Some(TypeDef::Interface(_) | TypeDef::Union(_))
        )
    }

    /// Returns the object types a named type can take at runtime.
    ///
    /// Objects map to themselves, interfaces to every object implementing
    /// them and unions to their members. Scalars and enums have none.
    pub fn possible_types(&self, name: &str) -> Vec<&str> {
        match self.types.get(name) {
            Some(TypeDef::Object(o)) => vec![o.name.as_str()],
            Some(TypeDef::Interface(_)) => self
                .types
                .values()
                .filter_map(|ty| match ty {
                    TypeDef::Object(o) if o.implements.iter().any(|i| i == name) => {
                        Some(o.name.as_str())
                    }
                    _ => None,
                })
                .collect(),
            Some(TypeDef::Union(u)) => u
                .members
                .iter()
                .filter(|member| matches!(self.types.get(member.as_str()), Some(TypeDef::Object(_))))
                .map(String::as_str)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns true if `object_type` is one of the possible types of `name`.
    pub fn is_possible_type(&self, name: &str, object_type: &str) -> bool {
        name == object_type || self.possible_types(name).contains(&object_type)
    }
}

/// A type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeDef {
    Scalar(ScalarDef),
    Object(ObjectDef),
    Interface(InterfaceDef),
    Union(UnionDef),
    Enum(EnumDef),
}

impl TypeDef {
    /// Returns the type name.
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(s) => &s.name,
            Self::Object(o) => &o.name,
            Self::Interface(i) => &i.name,
            Self::Union(u) => &u.name,
            Self::Enum(e) => &e.name,
        }
    }
}

/// Scalar type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarDef {
    pub name: String,
    pub description: Option<String>,
}

/// Object type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub implements: Vec<String>,
}

impl ObjectDef {
    /// Creates an object type without fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
            implements: Vec::new(),
        }
    }

    /// Adds a field.
    pub fn field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        let def = FieldDef::new(name, ty);
        self.fields.insert(def.name.clone(), def);
        self
    }

    /// Declares an implemented interface.
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.implements.push(interface.into());
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Interface type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
}

impl InterfaceDef {
    /// Creates an interface type without fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
        }
    }

    /// Adds a field.
    pub fn field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        let def = FieldDef::new(name, ty);
        self.fields.insert(def.name.clone(), def);
        self
    }
}

/// Union type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionDef {
    pub name: String,
    pub description: Option<String>,
    pub members: Vec<String>,
}

/// Enum type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub description: Option<String>,
    pub values: Vec<String>,
}

/// Field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
}

impl FieldDef {
    /// Creates a field definition.
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
        }
    }
}

/// Type reference.
///
/// Types are non-null unless wrapped in `Option`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Named(String),
    Option(Box<TypeRef>),
    List(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn option(inner: TypeRef) -> Self {
        Self::Option(Box::new(inner))
    }

    pub fn list(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }

    /// Returns true if null is an acceptable value.
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Option(_))
    }

    /// Strips an outer `Option`.
    pub fn non_null(&self) -> &TypeRef {
        match self {
            Self::Option(inner) => inner,
            other => other,
        }
    }

    /// Returns the item type if this is a (possibly nullable) list.
    pub fn list_item(&self) -> Option<&TypeRef> {
        match self.non_null() {
            Self::List(item) => Some(item),
            _ => None,
        }
    }

    /// Returns the innermost named type.
    pub fn base_name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Option(inner) | Self::List(inner) => inner.base_name(),
        }
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Option(inner) => write!(f, "Option<{inner}>"),
            Self::List(inner) => write!(f, "List<{inner}>"),
        }
    }
}

/// Schema builder.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    /// Creates a new schema builder.
    pub fn new() -> Self {
        let mut builder = Self::default();
        // Add built-in scalars
        for name in ["Int", "Float", "String", "Boolean", "ID"] {
            builder.schema.types.insert(
                name.to_string(),
                TypeDef::Scalar(ScalarDef {
                    name: name.to_string(),
                    description: Some(format!("Built-in {name} scalar")),
                }),
            );
        }
        builder
    }

    /// Sets the schema name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.schema.name = Some(name.into());
        self
    }

    /// Sets the schema description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.schema.description = Some(desc.into());
        self
    }

    /// Sets the query type.
    pub fn query_type(mut self, name: impl Into<String>) -> Self {
        self.schema.query_type = Some(name.into());
        self
    }

    /// Sets the mutation type.
    pub fn mutation_type(mut self, name: impl Into<String>) -> Self {
        self.schema.mutation_type = Some(name.into());
        self
    }

    /// Sets the subscription type.
    pub fn subscription_type(mut self, name: impl Into<String>) -> Self {
        self.schema.subscription_type = Some(name.into());
        self
    }

    /// Adds a type.
    pub fn add_type(mut self, type_def: TypeDef) -> Self {
        self.schema
            .types
            .insert(type_def.name().to_string(), type_def);
        self
    }

    /// Adds an object type.
    pub fn object(self, object: ObjectDef) -> Self {
        self.add_type(TypeDef::Object(object))
    }

    /// Adds an interface type.
    pub fn interface(self, interface: InterfaceDef) -> Self {
        self.add_type(TypeDef::Interface(interface))
    }

    /// Adds a union type.
    pub fn union(self, name: impl Into<String>, members: &[&str]) -> Self {
        self.add_type(TypeDef::Union(UnionDef {
            name: name.into(),
            description: None,
            members: members.iter().map(|m| (*m).to_string()).collect(),
        }))
    }

    /// Adds an enum type.
    pub fn enumeration(self, name: impl Into<String>, values: &[&str]) -> Self {
        self.add_type(TypeDef::Enum(EnumDef {
            name: name.into(),
            description: None,
            values: values.iter().map(|v| (*v).to_string()).collect(),
        }))
    }

    /// Builds the schema.
    pub fn build(self) -> Schema {
        self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character_schema() -> Schema {
        SchemaBuilder::new()
            .query_type("Query")
            .interface(InterfaceDef::new("Character").field("name", TypeRef::named("String")))
            .object(
                ObjectDef::new("Human")
                    .field("name", TypeRef::named("String"))
                    .implements("Character"),
            )
            .object(
                ObjectDef::new("Droid")
                    .field("name", TypeRef::named("String"))
                    .implements("Character"),
            )
            .union("SearchResult", &["Human", "Droid", "Episode"])
            .enumeration("Episode", &["NEWHOPE", "EMPIRE", "JEDI"])
            .object(ObjectDef::new("Query").field("hero", TypeRef::named("Character")))
            .build()
    }

    #[test]
    fn test_schema_builder() {
        let schema = SchemaBuilder::new()
            .name("StarWars")
            .description("A long time ago")
            .query_type("Query")
            .build();

        assert_eq!(schema.name, Some("StarWars".to_string()));
        assert_eq!(schema.root_type(OperationKind::Query), Some("Query"));
        assert_eq!(schema.root_type(OperationKind::Mutation), None);
        assert!(matches!(schema.get_type("ID"), Some(TypeDef::Scalar(_))));
    }

    #[test]
    fn test_possible_types() {
        let schema = character_schema();

        assert_eq!(schema.possible_types("Character"), vec!["Human", "Droid"]);
        assert_eq!(schema.possible_types("Human"), vec!["Human"]);
        assert_eq!(schema.possible_types("SearchResult"), vec!["Human", "Droid"]);
        assert!(schema.possible_types("Episode").is_empty());
        assert!(schema.is_possible_type("Character", "Droid"));
        assert!(!schema.is_possible_type("Human", "Droid"));
        assert!(schema.is_abstract("SearchResult"));
        assert!(!schema.is_composite("String"));
    }

    #[test]
    fn test_type_ref() {
        let ty = TypeRef::option(TypeRef::list(TypeRef::named("Character")));

        assert!(ty.is_nullable());
        assert_eq!(ty.list_item(), Some(&TypeRef::named("Character")));
        assert_eq!(ty.base_name(), "Character");
        assert_eq!(ty.to_string(), "Option<List<Character>>");
        assert!(!TypeRef::named("ID").is_nullable());
    }

    #[test]
    fn test_field_lookup() {
        let schema = character_schema();

        assert!(schema.field("Human", "name").is_some());
        assert!(schema.field("Character", "name").is_some());
        assert!(schema.field("Human", "missing").is_none());
        assert!(schema.field("Episode", "name").is_none());
    }
}
