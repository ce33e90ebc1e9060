//! Resolvers for the Star Wars schema.
//!
//! Droid lookups, owners and friends go through named batch loaders, so
//! the scheduler decides when their fetches happen.

use crate::data::{Character, Droid, Human, StarWarsData};
use bgql_execution::{
    BatchLoader, Context, Deferred, Resolution, ResolverArgs, ResolverError, ResolverMap,
    ResolverResult,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Loader names, as they appear in batch groups.
pub const DROIDS_BY_IDS: &str = "GetDroidsByIds";
pub const DROID_OWNERS_BY_IDS: &str = "GetDroidOwnersByIds";
pub const FRIENDS_FOR_IDS: &str = "GetFriendsForIds";

/// Id of the character returned by `hero`.
const HERO_ID: &str = "3";

/// Builds the resolver map over `data`.
pub fn star_wars_resolvers(data: Arc<StarWarsData>) -> ResolverMap {
    let mut resolvers = ResolverMap::new();

    let source = Arc::clone(&data);
    resolvers.register_async("Query", "hero", move |_parent, _args, _ctx, _info| {
        hero(Arc::clone(&source))
    });

    let source = Arc::clone(&data);
    resolvers.register_async("Query", "human", move |_parent, args, _ctx, _info| {
        human(Arc::clone(&source), args)
    });

    let source = Arc::clone(&data);
    resolvers.register_fn("Query", "droid", move |_parent, args, ctx, _info| {
        let id: String = args.require("id")?;
        let missing = id.clone();
        Ok(droids_loader(ctx, &source).load(id).and_then(move |value| {
            if value.is_null() {
                Err(ResolverError::NotFound(format!("Droid \"{missing}\" not found")))
            } else {
                Ok(Resolution::Value(value))
            }
        }))
    });

    for type_name in ["Human", "Droid"] {
        let source = Arc::clone(&data);
        resolvers.register_fn(type_name, "friends", move |parent, _args, ctx, _info| {
            let id = character_id(parent)?;
            Ok(friends_loader(ctx, &source).load(id))
        });
        resolvers.register_fn(type_name, "appearsIn", |parent, _args, _ctx, _info| {
            Ok(episodes(parent))
        });
    }

    let source = Arc::clone(&data);
    resolvers.register_fn("Droid", "owner", move |parent, _args, ctx, _info| {
        if parent.get("ownerId").map_or(true, Value::is_null) {
            return Ok(Deferred::ready(Value::Null));
        }
        let id = character_id(parent)?;
        Ok(owners_loader(ctx, &source)
            .load(id)
            .map(|owners| match owners {
                Value::Array(mut owners) if !owners.is_empty() => owners.swap_remove(0),
                _ => Value::Null,
            }))
    });

    let source = data;
    resolvers.register_async("Mutation", "createHuman", move |_parent, args, _ctx, _info| {
        create_human(Arc::clone(&source), args)
    });

    resolvers
}

fn droids_loader(ctx: &Context, data: &Arc<StarWarsData>) -> Arc<BatchLoader<String, Droid>> {
    let data = Arc::clone(data);
    ctx.loaders()
        .get_or_add_batch_loader(DROIDS_BY_IDS, move |ids: Vec<String>| {
            let data = Arc::clone(&data);
            async move {
                let droids = data.get_droids_by_ids(&ids).await;
                let by_id: HashMap<String, Droid> =
                    droids.into_iter().map(|d| (d.id.clone(), d)).collect();
                Ok::<_, ResolverError>(by_id)
            }
        })
}

fn owners_loader(
    ctx: &Context,
    data: &Arc<StarWarsData>,
) -> Arc<BatchLoader<String, Vec<Character>>> {
    let data = Arc::clone(data);
    ctx.loaders()
        .get_or_add_collection_batch_loader(DROID_OWNERS_BY_IDS, move |ids: Vec<String>| {
            let data = Arc::clone(&data);
            async move { Ok::<_, ResolverError>(data.get_droid_owners_by_ids(&ids).await) }
        })
}

fn friends_loader(
    ctx: &Context,
    data: &Arc<StarWarsData>,
) -> Arc<BatchLoader<String, Vec<Character>>> {
    let data = Arc::clone(data);
    ctx.loaders()
        .get_or_add_collection_batch_loader(FRIENDS_FOR_IDS, move |ids: Vec<String>| {
            let data = Arc::clone(&data);
            async move { Ok::<_, ResolverError>(data.get_friends_for_ids(&ids).await) }
        })
}

async fn hero(data: Arc<StarWarsData>) -> ResolverResult<Value> {
    let droid = data.get_droid_by_id(HERO_ID).await;
    to_value(droid.map(Character::Droid))
}

async fn human(data: Arc<StarWarsData>, args: ResolverArgs) -> ResolverResult<Value> {
    let id: String = args.require("id")?;
    let human = data.get_human_by_id(&id).await;
    to_value(human.map(Character::Human))
}

async fn create_human(data: Arc<StarWarsData>, args: ResolverArgs) -> ResolverResult<Value> {
    let name: String = args.require("name")?;
    let human = Human {
        id: String::new(),
        name: Some(name),
        friends: Vec::new(),
        appears_in: args.get_as("appearsIn").unwrap_or_default(),
        home_planet: args.get_as("homePlanet"),
    };
    let human = data.add_human(human).await;
    to_value(Character::Human(human))
}

fn character_id(parent: &Value) -> ResolverResult<String> {
    match parent.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        other => Err(ResolverError::UnexpectedValue {
            field: "id".to_string(),
            expected: "an ID string",
            found: other.map_or_else(|| "nothing".to_string(), Value::to_string),
        }),
    }
}

/// Maps stored episode numbers to enum values. Unknown numbers become null.
fn episodes(parent: &Value) -> Value {
    let Some(Value::Array(numbers)) = parent.get("appearsIn") else {
        return Value::Null;
    };
    numbers
        .iter()
        .map(|n| match n.as_i64() {
            Some(4) => Value::from("NEWHOPE"),
            Some(5) => Value::from("EMPIRE"),
            Some(6) => Value::from("JEDI"),
            _ => Value::Null,
        })
        .collect()
}

fn to_value(value: impl Serialize) -> ResolverResult<Value> {
    serde_json::to_value(value).map_err(|e| ResolverError::Internal(e.to_string()))
}
