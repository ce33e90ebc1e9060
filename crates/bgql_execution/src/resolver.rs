//! Resolver system.
//!
//! A resolver turns a parent value into the value of one field. It can
//! answer immediately, hand back a future, or return a [`Deferred`]
//! placeholder that only completes once the scheduler flushes its batch.

use crate::dataloader::Deferred;
use crate::error::{PathSegment, ResolverError};
use crate::executor::Context;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Arguments passed to a resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: IndexMap<String, Value>,
}

impl ResolverArgs {
    /// Creates new resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resolver args from a list of (name, value) pairs.
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        Self {
            args: pairs.into_iter().collect(),
        }
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a required argument, returning an error if not found.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        self.args
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))
            .and_then(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| ResolverError::ArgumentParseError(name.to_string(), e.to_string()))
            })
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }
}

impl From<IndexMap<String, Value>> for ResolverArgs {
    fn from(args: IndexMap<String, Value>) -> Self {
        Self { args }
    }
}

/// Info about the field being resolved.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    /// The field name being resolved.
    pub field_name: String,

    /// The declared return type.
    pub return_type: String,

    /// The concrete parent type name.
    pub parent_type: String,

    /// Path to this field.
    pub path: Vec<PathSegment>,
}

impl ResolverInfo {
    /// Creates new resolver info.
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            return_type: String::new(),
            parent_type: parent_type.into(),
            path: Vec::new(),
        }
    }

    /// Sets the return type.
    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    /// Sets the path.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }
}

/// Result type for resolvers.
pub type ResolverResult<T = Value> = Result<T, ResolverError>;

/// Future returned by asynchronous resolvers and deferred completions.
pub type ResolverFuture = Pin<Box<dyn Future<Output = ResolverResult<Resolution>> + Send>>;

/// What a resolver produced.
pub enum Resolution {
    /// The value is known.
    Value(Value),
    /// The value will be known once the future completes.
    Awaitable(ResolverFuture),
    /// The value needs a batched fetch that the scheduler flushes later.
    Deferred(Deferred),
}

impl Resolution {
    /// Wraps a future as an awaitable resolution.
    pub fn awaitable<F>(future: F) -> Self
    where
        F: Future<Output = ResolverResult<Resolution>> + Send + 'static,
    {
        Self::Awaitable(Box::pin(future))
    }
}

impl From<Value> for Resolution {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Deferred> for Resolution {
    fn from(deferred: Deferred) -> Self {
        Self::Deferred(deferred)
    }
}

impl Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Awaitable(_) => f.write_str("Awaitable"),
            Self::Deferred(deferred) => f.debug_tuple("Deferred").field(deferred).finish(),
        }
    }
}

/// Everything a resolver receives for one invocation.
#[derive(Debug, Clone)]
pub struct ResolveParams {
    pub parent: Arc<Value>,
    pub args: ResolverArgs,
    pub ctx: Arc<Context>,
    pub info: ResolverInfo,
}

/// Trait for field resolvers.
///
/// Resolvers are shared across concurrently running nodes, so they must be
/// safe to call from several tasks at once.
pub trait Resolver: Send + Sync {
    /// Resolves a field value.
    fn resolve(&self, params: ResolveParams) -> ResolverResult<Resolution>;
}

/// A boxed resolver.
pub type BoxedResolver = Box<dyn Resolver>;

/// A sync resolver function.
pub type SyncResolverFn = Arc<
    dyn Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult<Resolution>
        + Send
        + Sync,
>;

/// A wrapper for sync resolver functions.
///
/// The function may return a plain value or a [`Deferred`].
pub struct FnResolver {
    func: SyncResolverFn,
}

impl FnResolver {
    /// Creates a new function resolver.
    pub fn new<F, R>(f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult<R>
            + Send
            + Sync
            + 'static,
        R: Into<Resolution>,
    {
        Self {
            func: Arc::new(move |parent, args, ctx, info| {
                f(parent, args, ctx, info).map(Into::into)
            }),
        }
    }
}

impl Resolver for FnResolver {
    fn resolve(&self, params: ResolveParams) -> ResolverResult<Resolution> {
        (self.func)(&params.parent, &params.args, &params.ctx, &params.info)
    }
}

/// An async resolver function type.
pub type AsyncResolverFn = Arc<
    dyn Fn(Arc<Value>, ResolverArgs, Arc<Context>, ResolverInfo) -> ResolverFuture + Send + Sync,
>;

/// A wrapper for async resolver functions.
pub struct AsyncFnResolver {
    func: AsyncResolverFn,
}

impl AsyncFnResolver {
    /// Creates a new async function resolver.
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Arc<Value>, ResolverArgs, Arc<Context>, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult<R>> + Send + 'static,
        R: Into<Resolution> + Send + 'static,
    {
        Self {
            func: Arc::new(move |parent, args, ctx, info| {
                let fut = f(parent, args, ctx, info);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        }
    }
}

impl Resolver for AsyncFnResolver {
    fn resolve(&self, params: ResolveParams) -> ResolverResult<Resolution> {
        Ok(Resolution::Awaitable((self.func)(
            params.parent,
            params.args,
            params.ctx,
            params.info,
        )))
    }
}

/// Default resolver that accesses properties from the parent object.
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve(&self, params: ResolveParams) -> ResolverResult<Resolution> {
        let field_name = &params.info.field_name;
        match params.parent.as_ref() {
            Value::Object(map) => {
                let value = map
                    .get(field_name)
                    .or_else(|| map.get(&to_snake_case(field_name)))
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(Resolution::Value(value))
            }
            Value::Null => Ok(Resolution::Value(Value::Null)),
            _ => Err(ResolverError::FieldNotFound {
                type_name: params.info.parent_type.clone(),
                field: field_name.clone(),
            }),
        }
    }
}

/// Converts camelCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Picks the object type of a value returned for an interface or union.
pub type TypeResolverFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Storage for resolvers organized by type and field.
#[derive(Default)]
pub struct ResolverMap {
    /// Resolvers indexed by type name, then field name.
    resolvers: FxHashMap<String, FxHashMap<String, BoxedResolver>>,

    /// Type resolvers indexed by abstract type name.
    type_resolvers: FxHashMap<String, TypeResolverFn>,

    /// Default resolver for unregistered fields.
    default_resolver: Option<BoxedResolver>,
}

impl ResolverMap {
    /// Creates a new resolver map.
    pub fn new() -> Self {
        Self {
            resolvers: FxHashMap::default(),
            type_resolvers: FxHashMap::default(),
            default_resolver: Some(Box::new(DefaultResolver)),
        }
    }

    /// Registers a resolver for a specific type and field.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        self.resolvers
            .entry(type_name.into())
            .or_default()
            .insert(field_name.into(), Box::new(resolver));
    }

    /// Registers a sync function as a resolver.
    pub fn register_fn<F, R>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult<R>
            + Send
            + Sync
            + 'static,
        R: Into<Resolution>,
    {
        self.register(type_name, field_name, FnResolver::new(f));
    }

    /// Registers an async function as a resolver.
    pub fn register_async<F, Fut, R>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Arc<Value>, ResolverArgs, Arc<Context>, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult<R>> + Send + 'static,
        R: Into<Resolution> + Send + 'static,
    {
        self.register(type_name, field_name, AsyncFnResolver::new(f));
    }

    /// Registers how values of an interface or union map to object types.
    pub fn register_type_resolver<F>(&mut self, abstract_type: impl Into<String>, f: F)
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.type_resolvers.insert(abstract_type.into(), Arc::new(f));
    }

    /// Gets a resolver for a type and field.
    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&dyn Resolver> {
        self.resolvers
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
            .or(self.default_resolver.as_ref())
            .map(AsRef::as_ref)
    }

    /// Resolves the object type of a value of an abstract type.
    ///
    /// Falls back to the `__typename` property of the value.
    pub fn resolve_type(&self, abstract_type: &str, value: &Value) -> Option<String> {
        match self.type_resolvers.get(abstract_type) {
            Some(resolver) => resolver(value),
            None => value
                .get("__typename")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Sets the default resolver.
    pub fn set_default<R: Resolver + 'static>(&mut self, resolver: R) {
        self.default_resolver = Some(Box::new(resolver));
    }

    /// Removes the default resolver.
    pub fn remove_default(&mut self) {
        self.default_resolver = None;
    }
}

impl Debug for ResolverMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverMap")
            .field(
                "resolver_count",
                &self.resolvers.values().map(FxHashMap::len).sum::<usize>(),
            )
            .field("type_resolver_count", &self.type_resolvers.len())
            .field("has_default", &self.default_resolver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(parent: Value, field: &str, args: ResolverArgs) -> ResolveParams {
        ResolveParams {
            parent: Arc::new(parent),
            args,
            ctx: Arc::new(Context::new()),
            info: ResolverInfo::new(field, "User"),
        }
    }

    fn value_of(resolution: Resolution) -> Value {
        match resolution {
            Resolution::Value(value) => value,
            other => panic!("expected a value, got {other:?}"),
        }
    }

    #[test]
    fn test_resolver_args() {
        let mut args = ResolverArgs::new();
        args.set("id", serde_json::json!(123));
        args.set("name", serde_json::json!("test"));

        assert_eq!(args.get_as::<i64>("id"), Some(123));
        assert_eq!(args.get_as::<String>("name"), Some("test".to_string()));
        assert_eq!(args.get_as::<i64>("missing"), None);
        assert!(matches!(
            args.require::<String>("missing"),
            Err(ResolverError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("firstName"), "first_name");
        assert_eq!(to_snake_case("primaryFunction"), "primary_function");
        assert_eq!(to_snake_case("id"), "id");
    }

    #[test]
    fn test_default_resolver() {
        let parent = serde_json::json!({"name": "Alice", "home_planet": "Tatooine"});

        let name = DefaultResolver.resolve(params(parent.clone(), "name", ResolverArgs::new()));
        assert_eq!(value_of(name.unwrap()), serde_json::json!("Alice"));

        let planet = DefaultResolver.resolve(params(parent.clone(), "homePlanet", ResolverArgs::new()));
        assert_eq!(value_of(planet.unwrap()), serde_json::json!("Tatooine"));

        let missing = DefaultResolver.resolve(params(parent, "age", ResolverArgs::new()));
        assert_eq!(value_of(missing.unwrap()), Value::Null);

        let scalar = DefaultResolver.resolve(params(serde_json::json!(1), "name", ResolverArgs::new()));
        assert!(matches!(scalar, Err(ResolverError::FieldNotFound { .. })));
    }

    #[test]
    fn test_fn_resolver() {
        let resolver = FnResolver::new(|_parent, args, _ctx, _info| {
            let id: i64 = args.require("id")?;
            Ok(serde_json::json!({"id": id, "name": "User"}))
        });

        let mut args = ResolverArgs::new();
        args.set("id", serde_json::json!(42));

        let result = resolver.resolve(params(serde_json::json!({}), "user", args));
        assert_eq!(
            value_of(result.unwrap()),
            serde_json::json!({"id": 42, "name": "User"})
        );
    }

    #[tokio::test]
    async fn test_async_resolver_is_awaitable() {
        let resolver = AsyncFnResolver::new(|parent: Arc<Value>, _args, _ctx, _info| async move {
            Ok(parent["name"].clone())
        });

        let result = resolver
            .resolve(params(serde_json::json!({"name": "Bob"}), "name", ResolverArgs::new()))
            .unwrap();
        let Resolution::Awaitable(fut) = result else {
            panic!("expected an awaitable");
        };
        assert_eq!(value_of(fut.await.unwrap()), serde_json::json!("Bob"));
    }

    #[test]
    fn test_resolver_map_default_fallback() {
        let mut map = ResolverMap::new();
        map.register_fn("Query", "hello", |_parent, _args, _ctx, _info| {
            Ok(serde_json::json!("Hello, World!"))
        });

        let hello = map.get("Query", "hello").unwrap();
        let result = hello.resolve(params(serde_json::json!({}), "hello", ResolverArgs::new()));
        assert_eq!(value_of(result.unwrap()), serde_json::json!("Hello, World!"));

        let name = map.get("User", "name").unwrap();
        let result = name.resolve(params(serde_json::json!({"name": "Bob"}), "name", ResolverArgs::new()));
        assert_eq!(value_of(result.unwrap()), serde_json::json!("Bob"));

        map.remove_default();
        assert!(map.get("User", "name").is_none());
    }

    #[test]
    fn test_resolve_type() {
        let mut map = ResolverMap::new();
        map.register_type_resolver("Character", |value| {
            Some(if value.get("primaryFunction").is_some() { "Droid" } else { "Human" }.to_string())
        });

        let droid = serde_json::json!({"primaryFunction": "Astromech"});
        assert_eq!(map.resolve_type("Character", &droid), Some("Droid".to_string()));

        let tagged = serde_json::json!({"__typename": "Starship"});
        assert_eq!(map.resolve_type("Vehicle", &tagged), Some("Starship".to_string()));
        assert_eq!(map.resolve_type("Vehicle", &droid), None);
    }
}
