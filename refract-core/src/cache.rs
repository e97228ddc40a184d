//! A process-wide memo for async computations, with upstream/downstream
//! tracking, transitive invalidation, inflight coalescing, and content-hash
//! gating so that no-op recomputes keep downstream entries fresh.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::key::{Fingerprint, KeyArg, KeyValue};

/// A type-erased cached value.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

type ComputeResult = Result<CachedValue, CacheError>;
type InflightFuture = Shared<BoxFuture<'static, ComputeResult>>;
type ProducedValue = Result<(CachedValue, String), CacheError>;
type Producer = Arc<dyn Fn(LoadCtx, KeyValue) -> BoxFuture<'static, ProducedValue> + Send + Sync>;

/// The output of one producer run: the computed value plus the
/// producer-chosen content hash that gates downstream recomputes.
pub struct Produced<V> {
    pub value: V,
    pub content_hash: String,
}

impl<V> Produced<V> {
    pub fn new(value: V, content_hash: impl Into<String>) -> Self {
        Self {
            value,
            content_hash: content_hash.into(),
        }
    }
}

/// A key in the cache: a loader name plus its structured argument.
#[derive(Clone, Debug)]
pub struct CacheKey {
    loader: &'static str,
    arg: KeyValue,
    fingerprint: Fingerprint,
}

impl CacheKey {
    fn new(loader: &'static str, arg: KeyValue) -> Self {
        let fingerprint =
            KeyValue::Seq(vec![KeyValue::Str(loader.to_owned()), arg.clone()]).fingerprint();
        Self {
            loader,
            arg,
            fingerprint,
        }
    }
}

#[derive(Default)]
struct Entry {
    /// Retained so the entry can be recomputed from the store alone.
    key: Option<CacheKey>,
    value: Option<CachedValue>,
    content_hash: Option<String>,
    /// A stale entry keeps its value, but must re-verify its upstreams'
    /// content hashes before that value can be trusted again.
    stale: bool,
    upstreams: IndexSet<Fingerprint>,
    downstreams: IndexSet<Fingerprint>,
    last_upstream_hashes: FxHashMap<Fingerprint, String>,
}

#[derive(Default)]
struct CacheState {
    entries: FxHashMap<Fingerprint, Entry>,
    producers: HashMap<&'static str, Producer>,
    inflight: FxHashMap<Fingerprint, InflightFuture>,
    shut_down: bool,
}

struct CacheInner {
    state: Mutex<CacheState>,
}

/// The dependency-tracking query cache. Cloning shares the store; all
/// mutation happens in short critical sections on the inner lock, never
/// across a suspension point.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The compute context handed to producers. `load` calls made through it
/// register the loaded key as an upstream of the owning entry.
#[derive(Clone)]
pub struct LoadCtx {
    cache: QueryCache,
    owner: Fingerprint,
    /// Keys currently being computed on this chain, for cycle detection.
    stack: Arc<Vec<Fingerprint>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.inner.state.lock().unwrap()
    }

    /// Registers a producer and returns the typed handle for it.
    ///
    /// Panics if `name` is already registered; loader names identify
    /// producers in the store and must be unique.
    pub fn loader<K, V, F, Fut>(&self, name: &'static str, produce: F) -> Loader<K, V>
    where
        K: KeyArg + Send + 'static,
        V: Send + Sync + 'static,
        F: Fn(LoadCtx, K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Produced<V>, CacheError>> + Send + 'static,
    {
        let erased: Producer = Arc::new(move |ctx, arg| {
            let Some(key) = K::from_key(&arg) else {
                return std::future::ready(Err(CacheError::MalformedKey(name))).boxed();
            };
            let fut = produce(ctx, key);
            async move {
                let produced = fut.await?;
                let value: CachedValue = Arc::new(produced.value);
                Ok((value, produced.content_hash))
            }
            .boxed()
        });
        {
            let mut state = self.state();
            let previous = state.producers.insert(name, erased);
            assert!(previous.is_none(), "duplicate loader {name:?}");
        }
        Loader {
            cache: Arc::downgrade(&self.inner),
            name,
            _marker: PhantomData,
        }
    }

    /// Drops every entry, producer and inflight computation. Loader handles
    /// outlive this but answer [`CacheError::ShutDown`] afterwards.
    pub fn shutdown(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.producers.clear();
        state.inflight.clear();
        state.shut_down = true;
    }

    /// Clears `key`'s value and marks every transitive downstream stale.
    /// Stale entries keep their previous value so that a recompute which
    /// reproduces the old content hash can hand the same instance back.
    fn invalidate(&self, key: &CacheKey) {
        let mut state = self.state();
        let Some(entry) = state.entries.get_mut(&key.fingerprint) else {
            return;
        };
        debug!(target: "refract::cache", loader = key.loader, "invalidate");
        entry.value = None;
        entry.stale = true;
        let mut queue: Vec<Fingerprint> = entry.downstreams.iter().copied().collect();
        while let Some(fingerprint) = queue.pop() {
            let Some(entry) = state.entries.get_mut(&fingerprint) else {
                continue;
            };
            if entry.stale {
                continue;
            }
            entry.stale = true;
            queue.extend(entry.downstreams.iter().copied());
        }
    }

    fn content_hash_of(&self, fingerprint: Fingerprint) -> Option<String> {
        self.state()
            .entries
            .get(&fingerprint)
            .and_then(|entry| entry.content_hash.clone())
    }

    /// Computes (or reuses) the entry for `key`. `stack` is the chain of
    /// keys currently being computed by the caller.
    fn request(&self, key: CacheKey, stack: Arc<Vec<Fingerprint>>) -> BoxFuture<'static, ComputeResult> {
        let cache = self.clone();
        async move {
            let fingerprint = key.fingerprint;
            if stack.contains(&fingerprint) {
                return Err(CacheError::Cycle(key.loader));
            }

            enum Action {
                Fresh(CachedValue),
                Wait(InflightFuture),
            }

            let action = {
                let mut state = cache.state();
                if state.shut_down {
                    return Err(CacheError::ShutDown);
                }
                let entry = state.entries.entry(fingerprint).or_default();
                if entry.key.is_none() {
                    entry.key = Some(key.clone());
                }
                match (&entry.value, entry.stale) {
                    (Some(value), false) => Action::Fresh(Arc::clone(value)),
                    _ => match state.inflight.get(&fingerprint) {
                        Some(shared) => Action::Wait(shared.clone()),
                        None => {
                            let task = cache.clone().run(key.clone(), stack);
                            let shared = task.boxed().shared();
                            state.inflight.insert(fingerprint, shared.clone());
                            Action::Wait(shared)
                        }
                    },
                }
            };

            match action {
                Action::Fresh(value) => {
                    trace!(target: "refract::cache", loader = key.loader, "hit");
                    Ok(value)
                }
                Action::Wait(shared) => shared.await,
            }
        }
        .boxed()
    }

    /// The single-flight body behind [`Self::request`]: verify staleness
    /// against upstream content hashes, rerun the producer if needed, and
    /// commit the result.
    async fn run(self, key: CacheKey, stack: Arc<Vec<Fingerprint>>) -> ComputeResult {
        let fingerprint = key.fingerprint;
        let result = self.verify_or_recompute(&key, &stack).await;
        self.state().inflight.remove(&fingerprint);
        result
    }

    async fn verify_or_recompute(
        &self,
        key: &CacheKey,
        stack: &Arc<Vec<Fingerprint>>,
    ) -> ComputeResult {
        let fingerprint = key.fingerprint;

        // A stale entry that still has a value may be revived without
        // rerunning its producer: recompute each recorded upstream and
        // compare content hashes, short-circuiting on the first mismatch.
        let recorded = {
            let state = self.state();
            state.entries.get(&fingerprint).and_then(|entry| {
                entry.value.is_some().then(|| {
                    (
                        entry.upstreams.iter().copied().collect::<Vec<_>>(),
                        entry.last_upstream_hashes.clone(),
                    )
                })
            })
        };
        if let Some((upstreams, last_hashes)) = recorded {
            let mut verified = true;
            for upstream in upstreams {
                let upstream_key = {
                    let state = self.state();
                    state
                        .entries
                        .get(&upstream)
                        .and_then(|entry| entry.key.clone())
                };
                let Some(upstream_key) = upstream_key else {
                    verified = false;
                    break;
                };
                if self
                    .request(upstream_key, Arc::clone(stack))
                    .await
                    .is_err()
                {
                    verified = false;
                    break;
                }
                let current = self.content_hash_of(upstream);
                if current.as_deref() != last_hashes.get(&upstream).map(String::as_str) {
                    verified = false;
                    break;
                }
            }
            if verified {
                let mut state = self.state();
                if let Some(entry) = state.entries.get_mut(&fingerprint)
                    && let Some(value) = &entry.value
                {
                    trace!(target: "refract::cache", loader = key.loader, "verified");
                    entry.stale = false;
                    return Ok(Arc::clone(value));
                }
            }
        }

        debug!(target: "refract::cache", loader = key.loader, "compute");

        // Detach from previous upstreams; the rerun records its own.
        let producer = {
            let mut state = self.state();
            let old_upstreams = match state.entries.get_mut(&fingerprint) {
                Some(entry) => {
                    entry.last_upstream_hashes.clear();
                    std::mem::take(&mut entry.upstreams)
                }
                None => IndexSet::new(),
            };
            for upstream in old_upstreams {
                if let Some(entry) = state.entries.get_mut(&upstream) {
                    entry.downstreams.shift_remove(&fingerprint);
                }
            }
            state
                .producers
                .get(key.loader)
                .cloned()
                .ok_or(CacheError::MissingEntry(key.loader))?
        };

        let ctx = LoadCtx {
            cache: self.clone(),
            owner: fingerprint,
            stack: Arc::new(stack.iter().copied().chain([fingerprint]).collect()),
        };
        let produced = std::panic::AssertUnwindSafe(producer(ctx, key.arg.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(CacheError::Panicked(key.loader)));

        let mut state = self.state();
        let entry = state.entries.entry(fingerprint).or_default();
        match produced {
            Ok((value, content_hash)) => {
                // Stable-output gate: an unchanged content hash hands the
                // previous instance back so downstream identity checks and
                // freshness verification both see "no change".
                let same = entry.content_hash.as_deref() == Some(content_hash.as_str());
                let value = match (&entry.value, same) {
                    (Some(previous), true) => Arc::clone(previous),
                    _ => {
                        entry.value = Some(Arc::clone(&value));
                        entry.content_hash = Some(content_hash);
                        value
                    }
                };
                entry.stale = false;
                Ok(value)
            }
            Err(error) => {
                // Failures are not memoized; the next request retries.
                entry.value = None;
                entry.stale = true;
                Err(error)
            }
        }
    }

    /// Registers `upstream` as a dependency of the entry that owns `ctx`,
    /// recording the upstream's content hash as seen now.
    fn record_dependency(&self, ctx: &LoadCtx, upstream: Fingerprint) {
        let mut state = self.state();
        let hash = state
            .entries
            .get(&upstream)
            .and_then(|entry| entry.content_hash.clone())
            .unwrap_or_default();
        if let Some(entry) = state.entries.get_mut(&ctx.owner) {
            entry.upstreams.insert(upstream);
            entry.last_upstream_hashes.insert(upstream, hash);
        }
        if let Some(entry) = state.entries.get_mut(&upstream) {
            entry.downstreams.insert(ctx.owner);
        }
    }
}

/// A typed handle to one registered producer.
pub struct Loader<K, V> {
    cache: Weak<CacheInner>,
    name: &'static str,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> Clone for Loader<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<K, V> Loader<K, V>
where
    K: KeyArg,
    V: Send + Sync + 'static,
{
    fn cache(&self) -> Result<QueryCache, CacheError> {
        self.cache
            .upgrade()
            .map(|inner| QueryCache { inner })
            .ok_or(CacheError::ShutDown)
    }

    fn downcast(&self, value: CachedValue) -> Result<Arc<V>, CacheError> {
        value
            .downcast::<V>()
            .map_err(|_| CacheError::WrongType(self.name))
    }

    /// The external entry point: computes or reuses the entry for `key`.
    pub async fn get(&self, key: &K) -> Result<Arc<V>, CacheError> {
        let cache = self.cache()?;
        let cache_key = CacheKey::new(self.name, key.to_key());
        let value = cache.request(cache_key, Arc::new(Vec::new())).await?;
        self.downcast(value)
    }

    /// Loads `key` from within a compute body, registering it as an
    /// upstream of `ctx`'s owning entry.
    pub async fn load(&self, ctx: &LoadCtx, key: &K) -> Result<Arc<V>, CacheError> {
        let cache = self.cache()?;
        let cache_key = CacheKey::new(self.name, key.to_key());
        let fingerprint = cache_key.fingerprint;
        let value = cache.request(cache_key, Arc::clone(&ctx.stack)).await?;
        cache.record_dependency(ctx, fingerprint);
        self.downcast(value)
    }

    /// Clears the entry for `key` and marks its downstream closure stale.
    pub fn invalidate(&self, key: &K) {
        if let Ok(cache) = self.cache() {
            cache.invalidate(&CacheKey::new(self.name, key.to_key()));
        }
    }
}

/// Cache-level failures. Producer-internal failures should become values;
/// these are the conditions the cache itself can raise.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cycle detected while computing {0:?}")]
    Cycle(&'static str),
    #[error("no producer registered for {0:?}")]
    MissingEntry(&'static str),
    #[error("stored key does not decode for loader {0:?}")]
    MalformedKey(&'static str),
    #[error("cached value has the wrong type for loader {0:?}")]
    WrongType(&'static str),
    #[error("producer for {0:?} panicked")]
    Panicked(&'static str),
    #[error("cache has been shut down")]
    ShutDown,
    #[error("{0}")]
    Failed(&'static str),
}
