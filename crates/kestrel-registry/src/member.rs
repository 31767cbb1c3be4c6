use kestrel_memo::{
    BoundedCache, BoundedCacheConfig, CacheLoader, EvictionDispatcher, EvictionListener,
    LoadError, RemovalCause, Ticker,
};
use std::sync::Arc;
use std::time::Duration;

/// Maximum number of types whose member descriptors are kept in memory.
pub const MEMBER_CACHE_MAX: usize = 512;

/// Computes the member descriptors of a fully-qualified type.
pub trait MemberLoader<D>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn load_members(&self, fqcn: &str) -> Result<D, Self::Error>;

    /// Called for every descriptor set leaving the cache, including the re-insertion pass at
    /// shutdown. Member descriptors have no disk tier, so the default does nothing.
    fn on_evicted(&self, fqcn: &str, descriptors: &D, cause: RemovalCause) {
        let _ = (fqcn, descriptors, cause);
    }
}

impl<D, T> MemberLoader<D> for Arc<T>
where
    T: MemberLoader<D> + ?Sized,
{
    type Error = T::Error;

    fn load_members(&self, fqcn: &str) -> Result<D, Self::Error> {
        (**self).load_members(fqcn)
    }

    fn on_evicted(&self, fqcn: &str, descriptors: &D, cause: RemovalCause) {
        (**self).on_evicted(fqcn, descriptors, cause)
    }
}

/// Adapts a [`MemberLoader`] to the generic cache hooks.
pub struct MemberCacheLoader<L> {
    inner: Arc<L>,
}

impl<L> MemberCacheLoader<L> {
    pub fn new(inner: Arc<L>) -> Self {
        Self { inner }
    }
}

impl<D, L> CacheLoader<String, D> for MemberCacheLoader<L>
where
    L: MemberLoader<D>,
{
    type Error = L::Error;

    fn load(&self, fqcn: &String) -> Result<D, L::Error> {
        self.inner.load_members(fqcn)
    }
}

impl<D, L> EvictionListener<String, D> for MemberCacheLoader<L>
where
    L: MemberLoader<D>,
{
    fn on_eviction(&self, fqcn: String, descriptors: D, cause: RemovalCause) {
        tracing::trace!(
            target: "kestrel.registry",
            fqcn = %fqcn,
            cause = cause.as_str(),
            "member descriptors removed"
        );
        self.inner.on_evicted(&fqcn, &descriptors, cause);
    }
}

/// Shared cache of member descriptors keyed by fully-qualified type name.
pub struct MemberDescriptorCache<D> {
    cache: BoundedCache<String, D>,
}

impl<D> MemberDescriptorCache<D>
where
    D: Clone + Send + Sync + 'static,
{
    /// Idle expiry is measured on `ticker`.
    pub fn new<L>(
        loader: L,
        expire_after_access: Duration,
        dispatcher: EvictionDispatcher,
        ticker: Arc<dyn Ticker>,
    ) -> Self
    where
        L: MemberLoader<D>,
    {
        let hooks = Arc::new(MemberCacheLoader::new(Arc::new(loader)));
        let cache = BoundedCache::new(
            BoundedCacheConfig::new("member-descriptors", MEMBER_CACHE_MAX, expire_after_access),
            Arc::clone(&hooks),
        )
        .with_listener(hooks)
        .with_dispatcher(dispatcher)
        .with_ticker(ticker);
        Self { cache }
    }

    pub fn get(&self, fqcn: &str) -> Result<D, LoadError> {
        self.cache.get(&fqcn.to_owned())
    }

    pub fn invalidate(&self, fqcn: &str) {
        self.cache.invalidate(&fqcn.to_owned());
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Put every live entry back into the cache so the loader's eviction hook observes each
    /// one (as [`RemovalCause::Replaced`]). Returns the number of entries re-inserted.
    pub fn reinsert_all(&self) -> usize {
        let entries = self.cache.entries();
        let count = entries.len();
        for (fqcn, descriptors) in entries {
            self.cache.put(fqcn, descriptors);
        }
        count
    }

    pub fn run_pending_maintenance(&self) {
        self.cache.run_pending_maintenance();
    }

    pub fn flush_evictions(&self) {
        self.cache.flush_evictions();
    }
}
