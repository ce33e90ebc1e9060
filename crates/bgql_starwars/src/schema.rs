//! The Star Wars schema.

use bgql_execution::{InterfaceDef, ObjectDef, Schema, SchemaBuilder, TypeRef};

fn optional(name: &str) -> TypeRef {
    TypeRef::option(TypeRef::named(name))
}

/// `[Character]`, nullable list of nullable characters.
fn characters() -> TypeRef {
    TypeRef::option(TypeRef::list(optional("Character")))
}

/// `[Episode]`.
fn episodes() -> TypeRef {
    TypeRef::option(TypeRef::list(optional("Episode")))
}

/// Builds the schema.
pub fn star_wars_schema() -> Schema {
    SchemaBuilder::new()
        .name("StarWars")
        .query_type("Query")
        .mutation_type("Mutation")
        .enumeration("Episode", &["NEWHOPE", "EMPIRE", "JEDI"])
        .interface(
            InterfaceDef::new("Character")
                .field("id", TypeRef::named("ID"))
                .field("name", optional("String"))
                .field("friends", characters())
                .field("appearsIn", episodes()),
        )
        .object(
            ObjectDef::new("Human")
                .with_description("A humanoid creature in the Star Wars universe.")
                .field("id", TypeRef::named("ID"))
                .field("name", optional("String"))
                .field("friends", characters())
                .field("appearsIn", episodes())
                .field("homePlanet", optional("String"))
                .implements("Character"),
        )
        .object(
            ObjectDef::new("Droid")
                .with_description("A mechanical creature in the Star Wars universe.")
                .field("id", TypeRef::named("ID"))
                .field("ownerId", optional("ID"))
                .field("owner", optional("Character"))
                .field("name", optional("String"))
                .field("friends", characters())
                .field("appearsIn", episodes())
                .field("primaryFunction", optional("String"))
                .implements("Character"),
        )
        .object(
            ObjectDef::new("Query")
                .field("hero", optional("Character"))
                .field("human", optional("Human"))
                .field("droid", optional("Droid")),
        )
        .object(ObjectDef::new("Mutation").field("createHuman", optional("Human")))
        .build()
}
