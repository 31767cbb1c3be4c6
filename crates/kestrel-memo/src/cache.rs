use crate::dispatch::{Deferred, EvictionDispatcher};
use crate::error::LoadError;
use crate::listener::{CacheLoader, EvictionListener, NoopListener, RemovalCause};
use crate::ticker::{SystemTicker, Ticker};
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

type ErasedLoader<K, V> =
    dyn Fn(&K) -> Result<V, Arc<dyn std::error::Error + Send + Sync>> + Send + Sync;

/// Static configuration of a [`BoundedCache`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundedCacheConfig {
    /// Used in logs and errors.
    pub name: String,
    /// Maximum number of live entries; each entry counts as one unit.
    pub max_entries: usize,
    /// Entries not read or written for this long are expired.
    pub expire_after_access: Duration,
}

impl BoundedCacheConfig {
    pub fn new(name: impl Into<String>, max_entries: usize, expire_after_access: Duration) -> Self {
        Self {
            name: name.into(),
            max_entries,
            expire_after_access,
        }
    }
}

struct Entry<V> {
    value: V,
    last_access: Instant,
}

/// Single-flight load shared by the loading caller and everyone waiting on it.
struct Pending<V> {
    result: Mutex<Option<Result<V, LoadError>>>,
    ready: Condvar,
}

impl<V: Clone> Pending<V> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: Result<V, LoadError>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<V, LoadError> {
        let mut result = self.result.lock();
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            self.ready.wait(&mut result);
        }
    }
}

enum Slot<V> {
    Ready(Entry<V>),
    Loading(Arc<Pending<V>>),
}

struct Removal<K, V> {
    key: K,
    value: V,
    cause: RemovalCause,
}

struct Inner<K, V> {
    map: HashMap<K, Slot<V>>,
    /// LRU order of ready entries: front = least-recent, back = most-recent.
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.clone());
    }

    fn unlink(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }

    /// Drop every entry idle for at least `ttl`.
    ///
    /// `order` is sorted by last access, so expiry only ever looks at the front.
    fn expire(&mut self, now: Instant, ttl: Duration, removed: &mut Vec<Removal<K, V>>) {
        while let Some(oldest) = self.order.front() {
            let expired = match self.map.get(oldest) {
                Some(Slot::Ready(entry)) => now.saturating_duration_since(entry.last_access) >= ttl,
                _ => true,
            };
            if !expired {
                break;
            }
            let Some(key) = self.order.pop_front() else {
                break;
            };
            if let Some(Slot::Ready(entry)) = self.map.remove(&key) {
                removed.push(Removal {
                    key,
                    value: entry.value,
                    cause: RemovalCause::Expired,
                });
            }
        }
    }

    fn evict_overflow(&mut self, max_entries: usize, removed: &mut Vec<Removal<K, V>>) {
        while self.order.len() > max_entries {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            if let Some(Slot::Ready(entry)) = self.map.remove(&key) {
                removed.push(Removal {
                    key,
                    value: entry.value,
                    cause: RemovalCause::Size,
                });
            }
        }
    }
}

enum Lookup<V> {
    Hit(V),
    Wait(Arc<Pending<V>>),
    Load(Arc<Pending<V>>),
}

/// Bounded, idle-expiring, loading cache.
///
/// All operations take a single mutex; the loader and the eviction listener always run with
/// the mutex released. Removal notifications produced by one operation are queued on the
/// [`EvictionDispatcher`] as a single batch before the mutex is released, so a listener observes
/// removals in the order the cache performed them, even across threads.
pub struct BoundedCache<K, V> {
    config: BoundedCacheConfig,
    inner: Mutex<Inner<K, V>>,
    loader: Box<ErasedLoader<K, V>>,
    listener: Arc<dyn EvictionListener<K, V>>,
    dispatcher: EvictionDispatcher,
    ticker: Arc<dyn Ticker>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with no listener, an inline dispatcher and the system clock.
    pub fn new<L>(config: BoundedCacheConfig, loader: L) -> Self
    where
        L: CacheLoader<K, V>,
    {
        let loader: Box<ErasedLoader<K, V>> = Box::new(move |key: &K| {
            loader
                .load(key)
                .map_err(|err| Arc::new(err) as Arc<dyn std::error::Error + Send + Sync>)
        });

        Self {
            config,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            loader,
            listener: Arc::new(NoopListener),
            dispatcher: EvictionDispatcher::inline(),
            ticker: Arc::new(SystemTicker),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn EvictionListener<K, V>>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: EvictionDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BoundedCacheConfig {
        &self.config
    }

    /// Return the cached value for `key`, loading it on a miss.
    ///
    /// Concurrent callers asking for the same absent key share one loader call and all receive
    /// its result. Failed loads are not cached.
    pub fn get(&self, key: &K) -> Result<V, LoadError> {
        let now = self.ticker.now();
        let mut removed = Vec::new();
        let (lookup, deferred) = {
            let mut inner = self.inner.lock();
            inner.expire(now, self.config.expire_after_access, &mut removed);

            let lookup = match inner.map.entry(key.clone()) {
                hash_map::Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    Slot::Ready(entry) => {
                        entry.last_access = now;
                        Lookup::Hit(entry.value.clone())
                    }
                    Slot::Loading(pending) => Lookup::Wait(Arc::clone(pending)),
                },
                hash_map::Entry::Vacant(vacant) => {
                    let pending = Arc::new(Pending::new());
                    vacant.insert(Slot::Loading(Arc::clone(&pending)));
                    Lookup::Load(pending)
                }
            };
            if matches!(lookup, Lookup::Hit(_)) {
                inner.touch(key);
            }
            (lookup, self.enqueue_removals(removed))
        };
        run_deferred(deferred);

        match lookup {
            Lookup::Hit(value) => Ok(value),
            Lookup::Wait(pending) => pending.wait(),
            Lookup::Load(pending) => self.load_and_publish(key, pending),
        }
    }

    /// Return the cached value for `key` without loading.
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let now = self.ticker.now();
        let mut removed = Vec::new();
        let (value, deferred) = {
            let mut inner = self.inner.lock();
            inner.expire(now, self.config.expire_after_access, &mut removed);
            let value = match inner.map.get_mut(key) {
                Some(Slot::Ready(entry)) => {
                    entry.last_access = now;
                    Some(entry.value.clone())
                }
                _ => None,
            };
            if value.is_some() {
                inner.touch(key);
            }
            (value, self.enqueue_removals(removed))
        };
        run_deferred(deferred);
        value
    }

    /// Whether a live entry exists for `key`. Does not count as an access.
    pub fn contains_key(&self, key: &K) -> bool {
        self.with_maintained(|inner| matches!(inner.map.get(key), Some(Slot::Ready(_))))
    }

    /// Insert or replace the value for `key`.
    ///
    /// A replaced value is reported with [`RemovalCause::Replaced`]. A `put` that lands while a
    /// load for the same key is in flight wins over the loaded value.
    pub fn put(&self, key: K, value: V) {
        let now = self.ticker.now();
        let mut removed = Vec::new();
        let deferred = {
            let mut inner = self.inner.lock();
            inner.expire(now, self.config.expire_after_access, &mut removed);

            let entry = Entry {
                value,
                last_access: now,
            };
            if let Some(Slot::Ready(previous)) = inner.map.insert(key.clone(), Slot::Ready(entry))
            {
                removed.push(Removal {
                    key: key.clone(),
                    value: previous.value,
                    cause: RemovalCause::Replaced,
                });
            }
            inner.touch(&key);
            inner.evict_overflow(self.config.max_entries, &mut removed);
            self.enqueue_removals(removed)
        };
        run_deferred(deferred);
    }

    /// Remove the entry for `key`, reporting it with [`RemovalCause::Explicit`].
    ///
    /// An in-flight load for `key` is abandoned: its callers still receive the loaded value,
    /// but it is not inserted.
    pub fn invalidate(&self, key: &K) {
        let now = self.ticker.now();
        let mut removed = Vec::new();
        let deferred = {
            let mut inner = self.inner.lock();
            inner.expire(now, self.config.expire_after_access, &mut removed);
            if let Some(Slot::Ready(entry)) = inner.map.remove(key) {
                inner.unlink(key);
                removed.push(Removal {
                    key: key.clone(),
                    value: entry.value,
                    cause: RemovalCause::Explicit,
                });
            }
            self.enqueue_removals(removed)
        };
        run_deferred(deferred);
    }

    /// Remove every entry, reporting each with [`RemovalCause::Explicit`].
    pub fn invalidate_all(&self) {
        let mut removed = Vec::new();
        let deferred = {
            let mut inner = self.inner.lock();
            let order = std::mem::take(&mut inner.order);
            for key in order {
                if let Some(Slot::Ready(entry)) = inner.map.remove(&key) {
                    removed.push(Removal {
                        key,
                        value: entry.value,
                        cause: RemovalCause::Explicit,
                    });
                }
            }
            // Abandon in-flight loads too.
            inner.map.clear();
            self.enqueue_removals(removed)
        };
        run_deferred(deferred);
    }

    /// Snapshot of all live entries, least-recently-used first. Does not count as an access.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.with_maintained(|inner| {
            inner
                .order
                .iter()
                .filter_map(|key| match inner.map.get(key) {
                    Some(Slot::Ready(entry)) => Some((key.clone(), entry.value.clone())),
                    _ => None,
                })
                .collect()
        })
    }

    /// Number of live entries (in-flight loads are not counted).
    pub fn len(&self) -> usize {
        self.with_maintained(|inner| inner.order.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expire idle entries now instead of on the next access.
    pub fn run_pending_maintenance(&self) {
        self.with_maintained(|_| ());
    }

    /// Block until every removal notification produced so far has been delivered.
    pub fn flush_evictions(&self) {
        self.dispatcher.flush();
    }

    fn with_maintained<R>(&self, f: impl FnOnce(&Inner<K, V>) -> R) -> R {
        let now = self.ticker.now();
        let mut removed = Vec::new();
        let (out, deferred) = {
            let mut inner = self.inner.lock();
            inner.expire(now, self.config.expire_after_access, &mut removed);
            let out = f(&inner);
            (out, self.enqueue_removals(removed))
        };
        run_deferred(deferred);
        out
    }

    fn load_and_publish(&self, key: &K, pending: Arc<Pending<V>>) -> Result<V, LoadError> {
        let result = self.run_loader(key);

        let mut removed = Vec::new();
        let deferred = {
            let mut inner = self.inner.lock();
            let still_ours = matches!(
                inner.map.get(key),
                Some(Slot::Loading(slot)) if Arc::ptr_eq(slot, &pending)
            );
            if still_ours {
                match &result {
                    Ok(value) => {
                        let entry = Entry {
                            value: value.clone(),
                            last_access: self.ticker.now(),
                        };
                        inner.map.insert(key.clone(), Slot::Ready(entry));
                        inner.touch(key);
                        inner.evict_overflow(self.config.max_entries, &mut removed);
                    }
                    Err(_) => {
                        inner.map.remove(key);
                    }
                }
            } else {
                tracing::trace!(
                    target: "kestrel.memo",
                    cache = %self.config.name,
                    "entry changed during load; discarding loaded value"
                );
            }
            self.enqueue_removals(removed)
        };

        pending.complete(result.clone());
        run_deferred(deferred);
        result
    }

    fn run_loader(&self, key: &K) -> Result<V, LoadError> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.loader)(key))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => {
                tracing::debug!(
                    target: "kestrel.memo",
                    cache = %self.config.name,
                    error = %source,
                    "cache loader failed"
                );
                Err(LoadError::Loader {
                    cache: self.config.name.clone(),
                    source,
                })
            }
            Err(_) => {
                tracing::error!(
                    target: "kestrel.memo",
                    cache = %self.config.name,
                    "cache loader panicked"
                );
                Err(LoadError::Panicked {
                    cache: self.config.name.clone(),
                })
            }
        }
    }

    /// Hand one operation's removals to the dispatcher. Called with `inner` held, so batches
    /// reach the worker in the order the cache produced them.
    fn enqueue_removals(&self, removed: Vec<Removal<K, V>>) -> Option<Deferred> {
        if removed.is_empty() {
            return None;
        }
        for removal in &removed {
            tracing::trace!(
                target: "kestrel.memo",
                cache = %self.config.name,
                cause = removal.cause.as_str(),
                "cache entry removed"
            );
        }

        let listener = Arc::clone(&self.listener);
        self.dispatcher.enqueue(move || {
            for removal in removed {
                listener.on_eviction(removal.key, removal.value, removal.cause);
            }
        })
    }
}

/// Inline dispatchers hand the batch back; it runs here, after the lock is released.
fn run_deferred(deferred: Option<Deferred>) {
    if let Some(deferred) = deferred {
        deferred.run();
    }
}

impl<K, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("config", &self.config)
            .field("entries", &self.inner.lock().order.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
