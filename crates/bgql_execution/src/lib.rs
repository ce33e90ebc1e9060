//! Prioritized parallel execution for Better GraphQL.
//!
//! This crate resolves an operation as a tree of nodes:
//! - `schema`: Schema definition and building
//! - `operation`: Operations, selection sets and field collection
//! - `resolver`: Field resolvers and type resolvers
//! - `dataloader`: Batch loaders and deferred values
//! - `node`: The execution node tree
//! - `classifier`: Deferred flush prioritization
//! - `pool`: Reusable scheduler buffers
//! - `scheduler`: The wave scheduler and execution strategies
//! - `executor`: Operation execution, context and responses
//! - `completion`: Response completion with null propagation
//! - `metrics`: Timing records

pub mod classifier;
pub mod completion;
pub mod dataloader;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod node;
pub mod operation;
pub mod pool;
pub mod resolver;
pub mod scheduler;
pub mod schema;

pub use classifier::DeferredClassifier;
pub use completion::complete_response;
pub use dataloader::{BatchGroup, BatchLoader, DataLoaderContext, Deferred};
pub use error::{ExecutionError, FieldError, PathSegment, ResolverError};
pub use executor::{Context, Executor, ExecutorConfig, NodeOutcome, Response, ResponseExtensions};
pub use metrics::{PerfCategory, PerfRecord};
pub use node::{ExecutionNode, ExecutionTree, NodeId, NodeShape, ResolutionState};
pub use operation::{
    collect_fields, FieldSelection, InlineFragment, Operation, OperationKind, Selection,
    SelectionSet,
};
pub use pool::{BufferPool, PooledBuffers, WaveBuffers};
pub use resolver::{
    AsyncFnResolver, DefaultResolver, FnResolver, Resolution, ResolveParams, Resolver,
    ResolverArgs, ResolverFuture, ResolverInfo, ResolverMap, ResolverResult,
};
pub use scheduler::{
    ExecutionStrategy, RunFailure, RunSummary, SchedulerConfig, SchedulerStats, WaveScheduler,
};
pub use schema::{FieldDef, ObjectDef, InterfaceDef, Schema, SchemaBuilder, TypeDef, TypeRef};
pub use tokio_util::sync::CancellationToken;
