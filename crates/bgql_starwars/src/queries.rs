//! Prebuilt operations against the Star Wars schema.

use bgql_execution::{FieldSelection, Operation, SelectionSet};
use serde_json::Value;

fn id_and_name() -> SelectionSet {
    SelectionSet::new().fields(&["id", "name"])
}

fn friends() -> FieldSelection {
    FieldSelection::new("friends").select(id_and_name())
}

/// `droid(id) { id name primaryFunction owner { id name friends { id name } } friends { id name } appearsIn }`
pub fn droid_selection(id: &str) -> FieldSelection {
    FieldSelection::new("droid")
        .arg("id", Value::from(id))
        .select(
            SelectionSet::new()
                .fields(&["id", "name", "primaryFunction"])
                .field(FieldSelection::new("owner").select(id_and_name().field(friends())))
                .field(friends())
                .fields(&["appearsIn"]),
        )
}

/// The droid query, named `TestQuery`.
pub fn droid_query(id: &str) -> Operation {
    Operation::query(SelectionSet::new().field(droid_selection(id))).with_name("TestQuery")
}

/// `hero { __typename id name friends { id name } }`.
pub fn hero_selection() -> FieldSelection {
    FieldSelection::new("hero").select(
        SelectionSet::new()
            .fields(&["__typename", "id", "name"])
            .field(friends())
            .on("Droid", SelectionSet::new().fields(&["primaryFunction"]))
            .on("Human", SelectionSet::new().fields(&["homePlanet"])),
    )
}

pub fn hero_query() -> Operation {
    Operation::query(SelectionSet::new().field(hero_selection())).with_name("HeroQuery")
}

/// A droid lookup for `id` next to `hero`, so one root field can fail while
/// the other resolves.
pub fn droid_and_hero_query(id: &str) -> Operation {
    Operation::query(
        SelectionSet::new()
            .field(droid_selection(id))
            .field(hero_selection()),
    )
    .with_name("DroidAndHero")
}

/// `human(id) { id name homePlanet friends { id name } appearsIn }`.
pub fn human_query(id: &str) -> Operation {
    Operation::query(
        SelectionSet::new().field(
            FieldSelection::new("human")
                .arg("id", Value::from(id))
                .select(
                    SelectionSet::new()
                        .fields(&["id", "name", "homePlanet"])
                        .field(friends())
                        .fields(&["appearsIn"]),
                ),
        ),
    )
    .with_name("HumanQuery")
}

/// `createHuman(name, homePlanet) { id name homePlanet }`.
pub fn create_human_mutation(name: &str, home_planet: &str) -> Operation {
    Operation::mutation(
        SelectionSet::new().field(
            FieldSelection::new("createHuman")
                .arg("name", Value::from(name))
                .arg("homePlanet", Value::from(home_planet))
                .select(SelectionSet::new().fields(&["id", "name", "homePlanet"])),
        ),
    )
    .with_name("CreateHuman")
}
