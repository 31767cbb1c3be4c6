use std::sync::Arc;

/// Why an entry left a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// Idle for longer than the cache's expiry duration.
    Expired,
    /// Evicted as least-recently-used to respect the entry bound.
    Size,
    /// Overwritten by a `put` for the same key.
    Replaced,
    /// Removed by `invalidate` or `invalidate_all`.
    Explicit,
}

impl RemovalCause {
    /// Whether the cache chose to drop the entry (as opposed to the caller).
    pub fn was_evicted(self) -> bool {
        matches!(self, RemovalCause::Expired | RemovalCause::Size)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemovalCause::Expired => "expired",
            RemovalCause::Size => "size",
            RemovalCause::Replaced => "replaced",
            RemovalCause::Explicit => "explicit",
        }
    }
}

/// Receives every value removed from a cache.
///
/// Listeners run on the cache's [`crate::EvictionDispatcher`], never under the cache lock.
pub trait EvictionListener<K, V>: Send + Sync + 'static {
    fn on_eviction(&self, key: K, value: V, cause: RemovalCause);
}

impl<K, V, F> EvictionListener<K, V> for F
where
    F: Fn(K, V, RemovalCause) + Send + Sync + 'static,
{
    fn on_eviction(&self, key: K, value: V, cause: RemovalCause) {
        self(key, value, cause)
    }
}

/// Listener that ignores every removal.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl<K, V> EvictionListener<K, V> for NoopListener {
    fn on_eviction(&self, _key: K, _value: V, _cause: RemovalCause) {}
}

/// Computes the value for a key that is not cached.
pub trait CacheLoader<K, V>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn load(&self, key: &K) -> Result<V, Self::Error>;
}

impl<K, V, T> CacheLoader<K, V> for Arc<T>
where
    T: CacheLoader<K, V> + ?Sized,
{
    type Error = T::Error;

    fn load(&self, key: &K) -> Result<V, Self::Error> {
        (**self).load(key)
    }
}
