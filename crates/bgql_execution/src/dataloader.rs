//! Batch loading for Better GraphQL.
//!
//! A resolver that needs batched data calls [`BatchLoader::load`] and
//! returns the [`Deferred`] it gets back. Keys accumulate in the loader's
//! open batch until the scheduler flushes one of the deferred values; the
//! first completion fetches every registered key once and all waiters share
//! the result.

use crate::error::ResolverError;
use crate::resolver::{Resolution, ResolverFuture, ResolverResult};
use futures::future::BoxFuture;
use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Identity of the batch a deferred value belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchGroup {
    pub loader: Arc<str>,
    pub key: String,
}

impl std::fmt::Display for BatchGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.loader, self.key)
    }
}

type Completion = Box<dyn FnOnce() -> ResolverFuture + Send>;

/// A value that can only be produced once its batch is flushed.
pub struct Deferred {
    group: Option<BatchGroup>,
    complete: Completion,
}

impl Deferred {
    /// Creates a deferred value completed by `complete`.
    pub fn new<F>(group: BatchGroup, complete: F) -> Self
    where
        F: FnOnce() -> ResolverFuture + Send + 'static,
    {
        Self {
            group: Some(group),
            complete: Box::new(complete),
        }
    }

    /// A deferred value that is already known and needs no fetch.
    pub fn ready(value: Value) -> Self {
        Self {
            group: None,
            complete: Box::new(move || Box::pin(async move { Ok(Resolution::Value(value)) })),
        }
    }

    /// Returns the batch group, `None` for ready values.
    pub fn group(&self) -> Option<&BatchGroup> {
        self.group.as_ref()
    }

    /// Transforms the value once it is available.
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(Value) -> Value + Send + 'static,
    {
        self.and_then(move |value| Ok(Resolution::Value(f(value))))
    }

    /// Chains another step after the value is available.
    ///
    /// The step may return a value, a future or another deferred value; a
    /// nested deferred value goes back to the scheduler as a new deferral.
    pub fn and_then<F>(self, f: F) -> Self
    where
        F: FnOnce(Value) -> ResolverResult<Resolution> + Send + 'static,
    {
        let complete = self.complete;
        Self {
            group: self.group,
            complete: Box::new(move || {
                Box::pin(async move {
                    let mut resolution = complete().await?;
                    loop {
                        match resolution {
                            Resolution::Value(value) => return f(value),
                            Resolution::Awaitable(fut) => resolution = fut.await?,
                            Resolution::Deferred(inner) => {
                                return Ok(Resolution::Deferred(inner.and_then(f)));
                            }
                        }
                    }
                })
            }),
        }
    }

    /// Starts completing the value.
    pub(crate) fn into_future(self) -> ResolverFuture {
        (self.complete)()
    }
}

impl Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type FetchResult<K, V> = Result<HashMap<K, V>, ResolverError>;
type FetchFn<K, V> = Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, FetchResult<K, V>> + Send + Sync>;
type SharedValues<K> = Result<Arc<HashMap<K, Value>>, ResolverError>;

struct PendingBatch<K> {
    keys: Mutex<IndexSet<K>>,
    result: OnceCell<SharedValues<K>>,
}

impl<K> PendingBatch<K> {
    fn new() -> Self {
        Self {
            keys: Mutex::new(IndexSet::new()),
            result: OnceCell::new(),
        }
    }
}

/// Collects keys and fetches them in one call.
pub struct BatchLoader<K, V> {
    name: Arc<str>,
    fetch: FetchFn<K, V>,
    missing: Value,
    open: Mutex<Option<Arc<PendingBatch<K>>>>,
    fetches: AtomicUsize,
}

impl<K, V> BatchLoader<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Serialize + Send + 'static,
{
    /// Creates a loader whose missing keys resolve to null.
    pub fn new<F, Fut>(name: impl Into<Arc<str>>, fetch: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<K, V>> + Send + 'static,
    {
        Self {
            name: name.into(),
            fetch: Arc::new(move |keys| Box::pin(fetch(keys))),
            missing: Value::Null,
            open: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Sets the value used for keys the fetch did not return.
    pub fn with_missing(mut self, value: Value) -> Self {
        self.missing = value;
        self
    }

    /// Returns the loader name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of fetches performed so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Registers a key in the open batch.
    pub fn load(self: &Arc<Self>, key: K) -> Deferred {
        let batch = {
            let mut open = lock(&self.open);
            let batch = open.get_or_insert_with(|| Arc::new(PendingBatch::new()));
            lock(&batch.keys).insert(key.clone());
            Arc::clone(batch)
        };

        let group = BatchGroup {
            loader: Arc::clone(&self.name),
            key: format!("{key:?}"),
        };
        let loader = Arc::clone(self);
        Deferred::new(group, move || {
            Box::pin(async move {
                let values = loader.complete(&batch).await?;
                let value = values
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| loader.missing.clone());
                Ok(Resolution::Value(value))
            })
        })
    }

    async fn complete(&self, batch: &Arc<PendingBatch<K>>) -> SharedValues<K> {
        batch
            .result
            .get_or_init(|| async {
                {
                    let mut open = lock(&self.open);
                    if open.as_ref().is_some_and(|current| Arc::ptr_eq(current, batch)) {
                        *open = None;
                    }
                }
                // Keys stay in place so an abandoned fetch can be retried.
                let keys: Vec<K> = lock(&batch.keys).iter().cloned().collect();
                self.fetches.fetch_add(1, Ordering::Relaxed);
                debug!(loader = %self.name, keys = keys.len(), "fetching batch");

                match (self.fetch)(keys).await {
                    Ok(values) => values
                        .into_iter()
                        .map(|(key, value)| serde_json::to_value(value).map(|value| (key, value)))
                        .collect::<Result<HashMap<_, _>, _>>()
                        .map(Arc::new)
                        .map_err(|e| self.fetch_error(e.to_string())),
                    Err(err @ ResolverError::BatchFetch { .. }) => Err(err),
                    Err(err) => Err(self.fetch_error(err.to_string())),
                }
            })
            .await
            .clone()
    }

    fn fetch_error(&self, message: String) -> ResolverError {
        ResolverError::BatchFetch {
            loader: self.name.to_string(),
            message,
        }
    }
}

impl<K, V> Debug for BatchLoader<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLoader")
            .field("name", &self.name)
            .field("fetches", &self.fetches.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Per-request registry of batch loaders, keyed by name.
#[derive(Default)]
pub struct DataLoaderContext {
    loaders: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl DataLoaderContext {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the loader registered under `name`, creating it on first use.
    pub fn get_or_add_batch_loader<K, V, F, Fut>(
        &self,
        name: &str,
        fetch: F,
    ) -> Arc<BatchLoader<K, V>>
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: Serialize + Send + Sync + 'static,
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<K, V>> + Send + 'static,
    {
        self.get_or_insert(name, || BatchLoader::new(name, fetch))
    }

    /// Like [`Self::get_or_add_batch_loader`] for one-to-many relations.
    ///
    /// Keys the fetch did not return resolve to an empty list.
    pub fn get_or_add_collection_batch_loader<K, V, F, Fut>(
        &self,
        name: &str,
        fetch: F,
    ) -> Arc<BatchLoader<K, Vec<V>>>
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: Serialize + Send + Sync + 'static,
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<K, Vec<V>>> + Send + 'static,
    {
        self.get_or_insert(name, || {
            BatchLoader::new(name, fetch).with_missing(Value::Array(Vec::new()))
        })
    }

    /// Number of registered loaders.
    pub fn len(&self) -> usize {
        lock(&self.loaders).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_or_insert<K, V>(
        &self,
        name: &str,
        make: impl FnOnce() -> BatchLoader<K, V>,
    ) -> Arc<BatchLoader<K, V>>
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: Serialize + Send + Sync + 'static,
    {
        let mut loaders = lock(&self.loaders);
        if let Some(existing) = loaders.get(name) {
            match Arc::clone(existing).downcast::<BatchLoader<K, V>>() {
                Ok(loader) => return loader,
                Err(_) => {
                    warn!(loader = name, "loader registered with different key or value types");
                    return Arc::new(make());
                }
            }
        }
        let loader = Arc::new(make());
        loaders.insert(name.to_string(), Arc::clone(&loader) as Arc<dyn Any + Send + Sync>);
        loader
    }
}

impl Debug for DataLoaderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoaderContext")
            .field("loaders", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle(deferred: Deferred) -> ResolverResult<Value> {
        match deferred.into_future().await? {
            Resolution::Value(value) => Ok(value),
            other => panic!("expected a value, got {other:?}"),
        }
    }

    fn squares(calls: Arc<Mutex<Vec<Vec<u32>>>>) -> Arc<BatchLoader<u32, u32>> {
        Arc::new(BatchLoader::new("squares", move |keys: Vec<u32>| {
            lock(&calls).push(keys.clone());
            async move { Ok(keys.into_iter().map(|k| (k, k * k)).collect()) }
        }))
    }

    #[tokio::test]
    async fn test_batch_loader_coalesces_keys() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = squares(Arc::clone(&calls));

        let a = loader.load(2);
        let b = loader.load(3);
        let c = loader.load(2);
        assert_eq!(a.group(), c.group());
        assert_ne!(a.group(), b.group());

        assert_eq!(settle(b).await.unwrap(), serde_json::json!(9));
        assert_eq!(settle(a).await.unwrap(), serde_json::json!(4));
        assert_eq!(settle(c).await.unwrap(), serde_json::json!(4));

        assert_eq!(*lock(&calls), vec![vec![2, 3]]);
        assert_eq!(loader.fetches(), 1);
    }

    #[tokio::test]
    async fn test_batch_loader_opens_new_batch_after_flush() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = squares(Arc::clone(&calls));

        let first = loader.load(1);
        settle(first).await.unwrap();
        let second = loader.load(4);
        assert_eq!(settle(second).await.unwrap(), serde_json::json!(16));

        assert_eq!(*lock(&calls), vec![vec![1], vec![4]]);
    }

    #[tokio::test]
    async fn test_batch_fetch_error_reaches_every_waiter() {
        let loader: Arc<BatchLoader<u32, u32>> = Arc::new(BatchLoader::new("broken", |_keys| async {
            Err(ResolverError::custom("database offline"))
        }));

        let a = loader.load(1);
        let b = loader.load(2);
        let expected = ResolverError::BatchFetch {
            loader: "broken".to_string(),
            message: "database offline".to_string(),
        };
        assert_eq!(settle(a).await.unwrap_err(), expected);
        assert_eq!(settle(b).await.unwrap_err(), expected);
        assert_eq!(loader.fetches(), 1);
    }

    #[tokio::test]
    async fn test_missing_keys_use_default() {
        let ctx = DataLoaderContext::new();
        let single = ctx.get_or_add_batch_loader("single", |_keys: Vec<u32>| async {
            Ok(HashMap::<u32, String>::new())
        });
        let many = ctx.get_or_add_collection_batch_loader("many", |_keys: Vec<u32>| async {
            Ok(HashMap::<u32, Vec<String>>::new())
        });

        assert_eq!(settle(single.load(1)).await.unwrap(), Value::Null);
        assert_eq!(settle(many.load(1)).await.unwrap(), serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_deferred_continuations() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = squares(Arc::clone(&calls));

        let mapped = loader.load(3).map(|v| serde_json::json!({"square": v}));
        assert_eq!(
            settle(mapped).await.unwrap(),
            serde_json::json!({"square": 9})
        );

        let inner = Arc::clone(&loader);
        let chained = loader
            .load(2)
            .and_then(move |v| Ok(Resolution::Deferred(inner.load(v.as_u64().unwrap_or(0) as u32))));
        let Resolution::Deferred(next) = chained.into_future().await.unwrap() else {
            panic!("expected a nested deferral");
        };
        assert_eq!(settle(next).await.unwrap(), serde_json::json!(16));

        assert_eq!(settle(Deferred::ready(serde_json::json!(1))).await.unwrap(), serde_json::json!(1));
        assert!(Deferred::ready(Value::Null).group().is_none());
    }

    #[tokio::test]
    async fn test_context_reuses_loaders() {
        let ctx = DataLoaderContext::new();

        let first = ctx.get_or_add_batch_loader("users", |keys: Vec<u32>| async move {
            Ok(keys.into_iter().map(|k| (k, k)).collect::<HashMap<_, _>>())
        });
        let second = ctx.get_or_add_batch_loader("users", |_keys: Vec<u32>| async {
            Ok(HashMap::<u32, u32>::new())
        });
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ctx.len(), 1);

        let clash = ctx.get_or_add_batch_loader("users", |_keys: Vec<String>| async {
            Ok(HashMap::<String, u32>::new())
        });
        assert_eq!(clash.name(), "users");
        assert_eq!(ctx.len(), 1);
    }
}
