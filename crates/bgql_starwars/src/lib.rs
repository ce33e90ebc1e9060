//! Star Wars fixture for Better GraphQL execution.
//!
//! An in-memory data source with call counters, the schema over it, batch
//! loading resolvers and a few prebuilt operations. Used by the execution
//! tests, the benchmarks and the CLI.

pub mod data;
pub mod queries;
pub mod resolvers;
pub mod schema;

pub use data::{CallCounts, Character, Droid, Human, StarWarsData};
pub use resolvers::{star_wars_resolvers, DROIDS_BY_IDS, DROID_OWNERS_BY_IDS, FRIENDS_FOR_IDS};
pub use schema::star_wars_schema;

use bgql_execution::{Executor, ExecutorConfig};
use std::sync::Arc;

/// Builds an executor over `data` with the given configuration.
pub fn star_wars_executor(data: Arc<StarWarsData>, config: ExecutorConfig) -> Executor {
    Executor::with_config(config, star_wars_schema(), star_wars_resolvers(data))
}
