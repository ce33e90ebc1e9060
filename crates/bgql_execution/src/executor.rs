//! Operation execution for Better GraphQL.
//!
//! The executor builds an [`ExecutionTree`] for an operation, hands it to
//! the [`WaveScheduler`] configured for the operation kind and completes
//! the resolved tree into a [`Response`].

use crate::completion::complete_response;
use crate::dataloader::{DataLoaderContext, Deferred};
use crate::error::{ExecutionError, FieldError, ResolverError};
use crate::metrics::PerfRecord;
use crate::node::{ExecutionTree, NodeId, ResolutionState};
use crate::operation::{Operation, OperationKind};
use crate::resolver::{
    ResolveParams, Resolution, ResolverArgs, ResolverFuture, ResolverInfo, ResolverMap,
};
use crate::scheduler::{ExecutionStrategy, RunFailure, RunSummary, SchedulerConfig, WaveScheduler};
use crate::schema::Schema;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Maximum asynchronous nodes in flight per run. `None` is unbounded.
    pub max_parallelism: Option<usize>,
    /// Strategy for queries.
    pub query_strategy: ExecutionStrategy,
    /// Strategy for mutations.
    pub mutation_strategy: ExecutionStrategy,
    /// Keep scheduler buffers between runs.
    pub reuse_buffers: bool,
    /// Return timing records in the response extensions.
    pub enable_metrics: bool,
    /// Timeout for asynchronous field work in milliseconds.
    pub field_timeout_ms: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            query_strategy: ExecutionStrategy::PrioritizedParallel,
            mutation_strategy: ExecutionStrategy::Serial,
            reuse_buffers: true,
            enable_metrics: false,
            field_timeout_ms: None,
        }
    }
}

impl ExecutorConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = Some(max);
        self
    }

    pub fn with_query_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.query_strategy = strategy;
        self
    }

    pub fn with_mutation_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.mutation_strategy = strategy;
        self
    }

    pub fn with_reuse_buffers(mut self, reuse: bool) -> Self {
        self.reuse_buffers = reuse;
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    pub fn with_field_timeout(mut self, timeout: Duration) -> Self {
        self.field_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the field timeout.
    pub fn field_timeout(&self) -> Option<Duration> {
        self.field_timeout_ms.map(Duration::from_millis)
    }

    /// Scheduler configuration for a strategy.
    pub fn scheduler_config(&self, strategy: ExecutionStrategy) -> SchedulerConfig {
        SchedulerConfig::new(strategy)
            .with_max_parallelism(self.max_parallelism)
            .with_reuse_buffers(self.reuse_buffers)
            .with_metrics(self.enable_metrics)
    }
}

/// The operation executor.
pub struct Executor {
    config: ExecutorConfig,
    schema: Arc<Schema>,
    resolvers: Arc<ResolverMap>,
    query: WaveScheduler,
    mutation: WaveScheduler,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("resolvers", &self.resolvers)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor with the default configuration.
    pub fn new(schema: Schema, resolvers: ResolverMap) -> Self {
        Self::with_config(ExecutorConfig::default(), schema, resolvers)
    }

    /// Creates an executor with configuration.
    pub fn with_config(config: ExecutorConfig, schema: Schema, resolvers: ResolverMap) -> Self {
        let query = WaveScheduler::new(config.scheduler_config(config.query_strategy));
        let mutation = WaveScheduler::new(config.scheduler_config(config.mutation_strategy));
        Self {
            config,
            schema: Arc::new(schema),
            resolvers: Arc::new(resolvers),
            query,
            mutation,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    /// Returns the scheduler used for an operation kind.
    pub fn scheduler(&self, kind: OperationKind) -> Result<&WaveScheduler, ExecutionError> {
        match kind {
            OperationKind::Query => Ok(&self.query),
            OperationKind::Mutation => Ok(&self.mutation),
            OperationKind::Subscription => Err(ExecutionError::UnsupportedOperation(kind.as_str())),
        }
    }

    /// Builds the execution tree of an operation with an empty root value.
    pub fn build_tree(&self, operation: &Operation) -> Result<ExecutionTree, ExecutionError> {
        self.scheduler(operation.kind)?;
        let root_type = self
            .schema
            .root_type(operation.kind)
            .ok_or(ExecutionError::MissingRootType(operation.kind.as_str()))?;
        Ok(ExecutionTree::new(
            root_type,
            operation.selection_set.clone(),
            Value::Object(serde_json::Map::new()),
        ))
    }

    /// Resolves a tree in place.
    ///
    /// Each run gets its own loader registry, so nothing fetched in one run
    /// is visible to another.
    pub async fn run_tree(
        &self,
        kind: OperationKind,
        tree: &mut ExecutionTree,
        ctx: &Context,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunFailure> {
        let scheduler = self.scheduler(kind)?;
        let exec = ExecutionContext {
            schema: Arc::clone(&self.schema),
            resolvers: Arc::clone(&self.resolvers),
            ctx: Arc::new(ctx.for_run()),
            field_timeout: self.config.field_timeout(),
        };
        scheduler.run(&exec, tree, cancel).await
    }

    /// Executes an operation.
    ///
    /// Field faults end up in the response errors; run failures become a
    /// response without data.
    pub async fn execute(&self, operation: &Operation, ctx: &Context) -> Response {
        match self
            .try_execute(operation, ctx, &CancellationToken::new())
            .await
        {
            Ok(response) => response,
            Err(failure) => Response {
                extensions: self.extensions(failure.summary.perf),
                ..Response::error(FieldError::from(failure.error))
            },
        }
    }

    /// Executes an operation that can be cancelled.
    pub async fn execute_with_cancellation(
        &self,
        operation: &Operation,
        ctx: &Context,
        cancel: &CancellationToken,
    ) -> Result<Response, ExecutionError> {
        self.try_execute(operation, ctx, cancel)
            .await
            .map_err(|failure| failure.error)
    }

    #[tracing::instrument(
        skip_all,
        fields(kind = operation.kind.as_str(), operation = operation.name.as_deref())
    )]
    async fn try_execute(
        &self,
        operation: &Operation,
        ctx: &Context,
        cancel: &CancellationToken,
    ) -> Result<Response, RunFailure> {
        let mut tree = self.build_tree(operation)?;
        let summary = self.run_tree(operation.kind, &mut tree, ctx, cancel).await?;
        debug!(
            nodes = tree.len(),
            waves = summary.waves,
            flushes = summary.flushes,
            "operation resolved"
        );

        let (data, errors) = complete_response(&tree);
        Ok(Response {
            data,
            errors: (!errors.is_empty()).then_some(errors),
            extensions: self.extensions(summary.perf),
        })
    }

    fn extensions(&self, perf: Vec<PerfRecord>) -> Option<ResponseExtensions> {
        self.config
            .enable_metrics
            .then(|| ResponseExtensions { perf })
    }
}

/// Result of starting a node.
#[derive(Debug)]
pub enum NodeOutcome {
    Value(Arc<Value>),
    Deferred(Deferred),
    Fault(ResolverError),
}

pub(crate) enum Started {
    Completed(NodeOutcome),
    Pending(BoxFuture<'static, NodeOutcome>),
}

/// What a run shares with every node it starts.
pub(crate) struct ExecutionContext {
    pub(crate) schema: Arc<Schema>,
    pub(crate) resolvers: Arc<ResolverMap>,
    pub(crate) ctx: Arc<Context>,
    pub(crate) field_timeout: Option<Duration>,
}

impl ExecutionContext {
    /// Starts a node, completing it on the spot when possible.
    pub(crate) fn start(
        &self,
        tree: &mut ExecutionTree,
        id: NodeId,
    ) -> Result<Started, ExecutionError> {
        if let Some(placeholder) = tree.node_mut(id).placeholder.take() {
            return Ok(self.drive(placeholder.into_future()));
        }

        let node = tree.node(id);
        if let Some(source) = &node.source {
            return Ok(Started::Completed(NodeOutcome::Value(Arc::clone(source))));
        }
        let field = &node.field;
        if field.name == "__typename" {
            let typename = Value::String(node.parent_type.to_string());
            return Ok(Started::Completed(NodeOutcome::Value(Arc::new(typename))));
        }

        let parent = match node.parent.map(|parent| tree.node(parent).state()) {
            Some(ResolutionState::Resolved(value)) => Arc::clone(value),
            other => {
                return Err(ExecutionError::Invariant(format!(
                    "parent of {:?} is {}",
                    tree.path(id),
                    other.map_or("missing", ResolutionState::label)
                )));
            }
        };
        let Some(resolver) = self.resolvers.get(&node.parent_type, &field.name) else {
            return Ok(Started::Completed(NodeOutcome::Fault(
                ResolverError::FieldNotFound {
                    type_name: node.parent_type.to_string(),
                    field: field.name.clone(),
                },
            )));
        };

        let params = ResolveParams {
            parent,
            args: ResolverArgs::from(field.arguments.clone()),
            ctx: Arc::clone(&self.ctx),
            info: ResolverInfo::new(field.name.clone(), node.parent_type.as_ref())
                .with_return_type(node.declared.to_string())
                .with_path(tree.path(id)),
        };
        let resolved = catch_unwind(AssertUnwindSafe(|| resolver.resolve(params)))
            .unwrap_or_else(|payload| Err(ResolverError::Panicked(panic_message(&*payload))));
        Ok(match resolved {
            Ok(Resolution::Value(value)) => Started::Completed(NodeOutcome::Value(Arc::new(value))),
            Ok(Resolution::Deferred(deferred)) => Started::Completed(NodeOutcome::Deferred(deferred)),
            Ok(Resolution::Awaitable(work)) => self.drive(work),
            Err(error) => Started::Completed(NodeOutcome::Fault(error)),
        })
    }

    /// Polls asynchronous work once and hands it back if it is not done.
    ///
    /// A panic on any poll, the first included, settles the node as a fault.
    fn drive(&self, work: ResolverFuture) -> Started {
        let mut settled: BoxFuture<'static, NodeOutcome> =
            AssertUnwindSafe(settle(work, self.field_timeout))
                .catch_unwind()
                .map(|polled| {
                    polled.unwrap_or_else(|payload| {
                        NodeOutcome::Fault(ResolverError::Panicked(panic_message(&*payload)))
                    })
                })
                .boxed();
        match (&mut settled).now_or_never() {
            Some(outcome) => Started::Completed(outcome),
            None => Started::Pending(settled),
        }
    }
}

async fn settle(work: ResolverFuture, timeout: Option<Duration>) -> NodeOutcome {
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, settle_resolution(work))
            .await
            .unwrap_or(Err(ResolverError::Timeout(limit))),
        None => settle_resolution(work).await,
    };
    result.unwrap_or_else(NodeOutcome::Fault)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "resolver panicked".to_string())
}

/// Awaits nested futures until a value or a new deferral comes out.
async fn settle_resolution(work: ResolverFuture) -> Result<NodeOutcome, ResolverError> {
    let mut resolution = work.await?;
    loop {
        match resolution {
            Resolution::Value(value) => return Ok(NodeOutcome::Value(Arc::new(value))),
            Resolution::Awaitable(next) => resolution = next.await?,
            Resolution::Deferred(deferred) => return Ok(NodeOutcome::Deferred(deferred)),
        }
    }
}

/// Execution context.
#[derive(Debug, Clone)]
pub struct Context {
    /// Request-scoped data.
    pub data: HashMap<String, serde_json::Value>,
    /// Variables from the request.
    pub variables: HashMap<String, serde_json::Value>,
    loaders: Arc<DataLoaderContext>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a new context.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            variables: HashMap::new(),
            loaders: Arc::new(DataLoaderContext::new()),
        }
    }

    /// Creates a context with variables.
    pub fn with_variables(variables: HashMap<String, serde_json::Value>) -> Self {
        Self {
            variables,
            ..Self::new()
        }
    }

    /// Sets a value in the context.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.into(), v);
        }
    }

    /// Gets a value from the context.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a variable by name.
    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }

    /// Gets a variable as a specific type.
    pub fn variable_as<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Option<T> {
        self.variables
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Batch loaders of the current run.
    pub fn loaders(&self) -> &DataLoaderContext {
        &self.loaders
    }

    /// A copy of this context with an empty loader registry.
    pub fn for_run(&self) -> Self {
        Self {
            data: self.data.clone(),
            variables: self.variables.clone(),
            loaders: Arc::new(DataLoaderContext::new()),
        }
    }
}

/// Response extensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseExtensions {
    /// Timing records of the run.
    pub perf: Vec<PerfRecord>,
}

/// A GraphQL response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// The errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    /// Extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ResponseExtensions>,
}

impl Response {
    /// Creates a successful response with data.
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
            extensions: None,
        }
    }

    /// Creates an error response.
    pub fn error(error: FieldError) -> Self {
        Self::errors(vec![error])
    }

    /// Creates an error response with multiple errors.
    pub fn errors(errors: Vec<FieldError>) -> Self {
        Self {
            data: None,
            errors: Some(errors),
            extensions: None,
        }
    }

    /// Returns true if the response has errors.
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Returns true if the response has data.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{FieldSelection, SelectionSet};
    use crate::schema::{ObjectDef, SchemaBuilder, TypeRef};

    fn create_test_schema() -> Schema {
        SchemaBuilder::new()
            .query_type("Query")
            .mutation_type("Mutation")
            .object(
                ObjectDef::new("Query")
                    .field("user", TypeRef::option(TypeRef::named("User")))
                    .field("users", TypeRef::list(TypeRef::named("User")))
                    .field("slow", TypeRef::option(TypeRef::named("String"))),
            )
            .object(ObjectDef::new("Mutation").field("rename", TypeRef::named("User")))
            .object(
                ObjectDef::new("User")
                    .field("id", TypeRef::named("ID"))
                    .field("name", TypeRef::named("String")),
            )
            .build()
    }

    fn user_query() -> Operation {
        Operation::query(
            SelectionSet::new()
                .field(FieldSelection::new("user").select(SelectionSet::new().fields(&["id", "name"]))),
        )
    }

    #[tokio::test]
    async fn test_execute_simple_query() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Query", "user", |_parent, _args, _ctx, _info| {
            Ok(serde_json::json!({"id": "1", "name": "Alice"}))
        });

        let executor = Executor::new(create_test_schema(), resolvers);
        let response = executor.execute(&user_query(), &Context::new()).await;

        assert!(!response.has_errors());
        let data = response.data.unwrap();
        assert_eq!(data["user"]["id"], "1");
        assert_eq!(data["user"]["name"], "Alice");
    }

    #[tokio::test]
    async fn test_execute_typename() {
        let executor = Executor::new(create_test_schema(), ResolverMap::new());
        let operation = Operation::query(SelectionSet::new().fields(&["__typename"]));

        let response = executor.execute(&operation, &Context::new()).await;

        assert_eq!(response.data.unwrap()["__typename"], "Query");
    }

    #[tokio::test]
    async fn test_execute_with_arguments() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_async("Query", "user", |_parent, args, _ctx, _info| async move {
            let id: String = args.require("id")?;
            Ok::<_, ResolverError>(serde_json::json!({"id": id, "name": "User"}))
        });

        let executor = Executor::new(create_test_schema(), resolvers);
        let operation = Operation::query(SelectionSet::new().field(
            FieldSelection::new("user")
                .alias("someone")
                .arg("id", serde_json::json!("42"))
                .select(SelectionSet::new().fields(&["id"])),
        ));

        let response = executor.execute(&operation, &Context::new()).await;

        assert_eq!(response.data.unwrap()["someone"]["id"], "42");
    }

    #[tokio::test]
    async fn test_execute_with_error() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Query", "user", |_parent, _args, _ctx, _info| {
            Err::<Value, _>(ResolverError::custom("User not found"))
        });

        let executor = Executor::new(create_test_schema(), resolvers);
        let response = executor.execute(&user_query(), &Context::new()).await;

        assert_eq!(response.data, Some(serde_json::json!({"user": null})));
        let errors = response.errors.unwrap();
        assert_eq!(errors[0].message, "User not found");
        assert_eq!(errors[0].path, Some(vec!["user".into()]));
    }

    #[tokio::test]
    async fn test_execute_list_field() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Query", "users", |_parent, _args, _ctx, _info| {
            Ok(serde_json::json!([
                {"id": "1", "name": "Alice"},
                {"id": "2", "name": "Bob"}
            ]))
        });

        let executor = Executor::new(create_test_schema(), resolvers);
        let operation = Operation::query(
            SelectionSet::new()
                .field(FieldSelection::new("users").select(SelectionSet::new().fields(&["id", "name"]))),
        );

        let response = executor.execute(&operation, &Context::new()).await;

        let data = response.data.unwrap();
        let users = data["users"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["id"], "1");
        assert_eq!(users[1]["name"], "Bob");
    }

    #[tokio::test]
    async fn test_execute_field_timeout() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_async("Query", "slow", |_parent, _args, _ctx, _info| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::json!("done"))
        });

        let config = ExecutorConfig::new().with_field_timeout(Duration::from_millis(10));
        let executor = Executor::with_config(config, create_test_schema(), resolvers);
        let operation = Operation::query(SelectionSet::new().fields(&["slow"]));

        let response = executor.execute(&operation, &Context::new()).await;

        assert_eq!(response.data, Some(serde_json::json!({"slow": null})));
        let errors = response.errors.unwrap();
        assert_eq!(errors[0].message, ResolverError::Timeout(Duration::from_millis(10)).to_string());
    }

    #[tokio::test]
    async fn test_subscription_is_rejected() {
        let executor = Executor::new(create_test_schema(), ResolverMap::new());
        let operation = Operation {
            kind: OperationKind::Subscription,
            name: None,
            selection_set: SelectionSet::new(),
        };

        let result = executor
            .execute_with_cancellation(&operation, &Context::new(), &CancellationToken::new())
            .await;
        assert_eq!(result, Err(ExecutionError::UnsupportedOperation("subscription")));
    }

    #[tokio::test]
    async fn test_mutation_uses_serial_strategy() {
        let executor = Executor::new(create_test_schema(), ResolverMap::new());
        assert_eq!(
            executor.scheduler(OperationKind::Mutation).unwrap().config().strategy,
            ExecutionStrategy::Serial
        );
        assert_eq!(
            executor.scheduler(OperationKind::Query).unwrap().config().strategy,
            ExecutionStrategy::PrioritizedParallel
        );
    }

    #[tokio::test]
    async fn test_metrics_extension() {
        let config = ExecutorConfig::new().with_metrics(true);
        let executor = Executor::with_config(config, create_test_schema(), ResolverMap::new());

        let response = executor.execute(&user_query(), &Context::new()).await;

        let perf = response.extensions.unwrap().perf;
        assert!(perf
            .iter()
            .any(|record| record.category == crate::metrics::PerfCategory::Execution));
    }

    #[test]
    fn test_config_deserialization() {
        let config: ExecutorConfig = serde_json::from_value(serde_json::json!({
            "maxParallelism": 4,
            "queryStrategy": "parallel",
            "fieldTimeoutMs": 250
        }))
        .unwrap();

        assert_eq!(config.max_parallelism, Some(4));
        assert_eq!(config.query_strategy, ExecutionStrategy::Parallel);
        assert_eq!(config.mutation_strategy, ExecutionStrategy::Serial);
        assert_eq!(config.field_timeout(), Some(Duration::from_millis(250)));
        assert!(config.reuse_buffers);
    }

    #[test]
    fn test_context() {
        let mut ctx = Context::new();
        ctx.set("user_id", "123");

        assert_eq!(ctx.get::<String>("user_id"), Some("123".to_string()));
        assert_eq!(ctx.get::<String>("missing"), None);

        let run = ctx.for_run();
        assert_eq!(run.get::<String>("user_id"), Some("123".to_string()));
        assert!(!Arc::ptr_eq(&run.loaders, &ctx.loaders));
    }

    #[test]
    fn test_context_with_variables() {
        let mut vars = HashMap::new();
        vars.insert("id".to_string(), serde_json::json!("42"));

        let ctx = Context::with_variables(vars);
        assert_eq!(ctx.variable("id"), Some(&serde_json::json!("42")));
        assert_eq!(ctx.variable_as::<String>("id"), Some("42".to_string()));
    }

    #[test]
    fn test_response() {
        let data_response = Response::data(serde_json::json!({"hello": "world"}));
        assert!(data_response.has_data());
        assert!(!data_response.has_errors());

        let error_response = Response::error(FieldError::new("Error"));
        assert!(!error_response.has_data());
        assert!(error_response.has_errors());
    }
}
