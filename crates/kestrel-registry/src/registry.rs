use crate::error::{RegistryError, Result};
use crate::member::{MemberDescriptorCache, MemberLoader};
use crate::project::{Project, SourceUnit};
use crate::source_loader::SourceCacheLoader;
use crate::source_map::{SourceMapDatabase, SourceMapTable};
use crate::stats::SourceCacheStats;
use dashmap::DashMap;
use kestrel_cache::{canonical_path, CacheDir, CacheLocation, ChecksumStore, Fingerprint};
use kestrel_config::{CacheSettings, KestrelConfig, DEFAULT_EXPIRE_AFTER_ACCESS};
use kestrel_memo::{
    BoundedCache, BoundedCacheConfig, EvictionDispatcher, EvictionListener, SystemTicker, Ticker,
};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Name of the thread running eviction listeners for every cache in a registry.
pub const EVICTION_THREAD_NAME: &str = "kestrel-evictions";

struct ProjectSourceCache<P: Project> {
    loader: Arc<SourceCacheLoader<P>>,
    cache: BoundedCache<PathBuf, P::Source>,
}

/// Entry point for every cache of a running server.
///
/// Owns one source cache and one source-map table per project root (created on first use and
/// kept for the registry's lifetime), plus one member-descriptor cache shared by all projects.
/// All eviction listeners run on a single dispatcher thread, so disk write-back never happens
/// under a cache lock and is applied in the order the caches produced it.
///
/// `D` is the member-descriptor payload.
pub struct CacheRegistry<P: Project, D> {
    settings: CacheSettings,
    location: CacheLocation,
    expire_after_access: Duration,
    source_caches: DashMap<PathBuf, Arc<ProjectSourceCache<P>>>,
    source_maps: DashMap<PathBuf, Arc<SourceMapTable>>,
    source_map_db: Arc<dyn SourceMapDatabase>,
    member_cache: OnceLock<MemberDescriptorCache<D>>,
    dispatcher: EvictionDispatcher,
    ticker: Arc<dyn Ticker>,
}

impl<P, D> CacheRegistry<P, D>
where
    P: Project,
    D: Clone + Send + Sync + 'static,
{
    pub fn new(settings: CacheSettings, source_map_db: Arc<dyn SourceMapDatabase>) -> Self {
        let location = settings.cache_location();
        Self {
            settings,
            location,
            expire_after_access: DEFAULT_EXPIRE_AFTER_ACCESS,
            source_caches: DashMap::new(),
            source_maps: DashMap::new(),
            source_map_db,
            member_cache: OnceLock::new(),
            dispatcher: EvictionDispatcher::spawn(EVICTION_THREAD_NAME),
            ticker: Arc::new(SystemTicker),
        }
    }

    pub fn from_config(config: &KestrelConfig, source_map_db: Arc<dyn SourceMapDatabase>) -> Self {
        Self::new(config.cache.clone(), source_map_db)
    }

    /// Use `ticker` for idle expiry of caches created after this call.
    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn source_cache(&self, project: &Arc<P>) -> Arc<ProjectSourceCache<P>> {
        let root = canonical_path(project.root());
        if let Some(existing) = self.source_caches.get(&root) {
            return Arc::clone(existing.value());
        }

        let created = self
            .source_caches
            .entry(root.clone())
            .or_insert_with(|| Arc::new(self.create_source_cache(project, &root)));
        Arc::clone(created.value())
    }

    fn create_source_cache(&self, project: &Arc<P>, root: &Path) -> ProjectSourceCache<P> {
        let loader = if self.settings.use_source_cache {
            match CacheDir::new(root, &self.location) {
                Ok(dir) => SourceCacheLoader::new(Arc::clone(project), &dir),
                Err(err) => {
                    tracing::warn!(
                        target: "kestrel.registry",
                        project_root = %root.display(),
                        error = %err,
                        "failed to initialize source cache directory; disk tier disabled"
                    );
                    SourceCacheLoader::without_disk(Arc::clone(project))
                }
            }
        } else {
            SourceCacheLoader::without_disk(Arc::clone(project))
        };
        let loader = Arc::new(loader);

        tracing::debug!(
            target: "kestrel.registry",
            project_root = %root.display(),
            max_entries = self.settings.source_cache_size,
            disk = loader.uses_disk(),
            "created source cache"
        );

        let listener: Arc<dyn EvictionListener<PathBuf, P::Source>> = loader.clone();
        let cache = BoundedCache::new(
            BoundedCacheConfig::new(
                format!("sources:{}", root.display()),
                self.settings.source_cache_size,
                self.expire_after_access,
            ),
            Arc::clone(&loader),
        )
        .with_listener(listener)
        .with_dispatcher(self.dispatcher.clone())
        .with_ticker(Arc::clone(&self.ticker));

        ProjectSourceCache { loader, cache }
    }

    /// The analysis result for `file`, from memory, disk or a fresh parse.
    pub fn get_source(&self, project: &Arc<P>, file: &Path) -> Result<P::Source> {
        let sources = self.source_cache(project);
        Ok(sources.cache.get(&canonical_path(file))?)
    }

    /// Store `source` as the current result for its file. A previously cached result is
    /// written back to disk.
    pub fn replace_source(&self, project: &Arc<P>, source: P::Source) {
        let sources = self.source_cache(project);
        let key = canonical_path(source.file());
        sources.cache.put(key, source);
    }

    /// Drop the cached result for `file` from memory and disk.
    pub fn invalidate_source(&self, project: &Arc<P>, file: &Path) {
        let sources = self.source_cache(project);
        sources.cache.invalidate(&canonical_path(file));
    }

    /// Whether `file` currently has an in-memory result.
    pub fn is_source_cached(&self, project: &Arc<P>, file: &Path) -> bool {
        self.source_cache(project)
            .cache
            .contains_key(&canonical_path(file))
    }

    /// The project's checksum table, shared with its source loader.
    pub fn checksum_store(&self, project: &Arc<P>) -> Arc<ChecksumStore> {
        Arc::clone(self.source_cache(project).loader.checksums())
    }

    /// Fingerprint `file` as it is on disk now and record it for the project.
    pub fn record_checksum(&self, project: &Arc<P>, file: &Path) -> Result<Fingerprint> {
        Ok(self.checksum_store(project).refresh(file)?)
    }

    /// Deterministic disk location of `file`'s cached result, when the disk tier is enabled.
    pub fn source_cache_path(&self, project: &Arc<P>, file: &Path) -> Option<PathBuf> {
        self.source_cache(project).loader.entry_path(file)
    }

    pub fn source_stats(&self, project: &Arc<P>) -> SourceCacheStats {
        self.source_cache(project).loader.stats()
    }

    /// Initialize the shared member-descriptor cache. Only the first call has an effect;
    /// returns whether this call initialized it.
    pub fn setup_member_cache<L>(&self, loader: L) -> bool
    where
        L: MemberLoader<D>,
    {
        let mut initialized = false;
        self.member_cache.get_or_init(|| {
            initialized = true;
            MemberDescriptorCache::new(
                loader,
                self.expire_after_access,
                self.dispatcher.clone(),
                Arc::clone(&self.ticker),
            )
        });
        initialized
    }

    fn members(&self) -> Result<&MemberDescriptorCache<D>> {
        self.member_cache
            .get()
            .ok_or(RegistryError::MemberCacheNotInitialized)
    }

    pub fn get_member_descriptors(&self, fqcn: &str) -> Result<D> {
        Ok(self.members()?.get(fqcn)?)
    }

    pub fn invalidate_member_descriptors(&self, fqcn: &str) -> Result<()> {
        self.members()?.invalidate(fqcn);
        Ok(())
    }

    fn source_map(&self, project: &Arc<P>) -> Arc<SourceMapTable> {
        let root = canonical_path(project.root());
        if let Some(existing) = self.source_maps.get(&root) {
            return Arc::clone(existing.value());
        }

        let table = self.source_maps.entry(root.clone()).or_insert_with(|| {
            let entries = self.source_map_db.load_source_map(&root);
            tracing::debug!(
                target: "kestrel.registry",
                project_root = %root.display(),
                entries = entries.len(),
                "hydrated source map"
            );
            Arc::new(SourceMapTable::new(entries))
        });
        Arc::clone(table.value())
    }

    pub fn get_source_map(&self, project: &Arc<P>, fqcn: &str) -> Option<String> {
        self.source_map(project).get(fqcn)
    }

    pub fn replace_source_map(&self, project: &Arc<P>, fqcn: &str, path: impl Into<String>) {
        self.source_map(project).insert(fqcn, path);
    }

    /// Persist the project's whole source map. Returns whether the database accepted it.
    pub fn save_source_map(&self, project: &Arc<P>) -> bool {
        let root = canonical_path(project.root());
        let snapshot = self.source_map(project).snapshot();
        self.source_map_db.save_source_map(&root, &snapshot)
    }

    /// Expire idle entries in every cache now instead of on their next access.
    ///
    /// Expired sources are written back like size evictions.
    pub fn run_pending_maintenance(&self) {
        for entry in self.source_caches.iter() {
            entry.value().cache.run_pending_maintenance();
        }
        if let Some(members) = self.member_cache.get() {
            members.run_pending_maintenance();
        }
    }

    /// Block until every eviction listener queued so far has run.
    pub fn flush_evictions(&self) {
        self.dispatcher.flush();
    }

    /// Re-insert every member-cache entry so its eviction hook sees each live entry, then wait
    /// for all pending disk write-back to finish.
    pub fn shutdown(&self) {
        let reinserted = self
            .member_cache
            .get()
            .map(MemberDescriptorCache::reinsert_all)
            .unwrap_or(0);
        self.dispatcher.flush();
        tracing::info!(
            target: "kestrel.registry",
            member_entries = reinserted,
            projects = self.source_caches.len(),
            "cache registry shut down"
        );
    }
}

impl<P, D> CacheRegistry<P, D>
where
    P: Project,
    D: Clone + Send + Sync + 'static,
{
    /// A guard that runs [`CacheRegistry::shutdown`] when dropped.
    ///
    /// Panics raised during shutdown are caught and logged so they cannot abort process exit.
    pub fn shutdown_guard(self: &Arc<Self>) -> ShutdownGuard {
        let registry = Arc::clone(self);
        ShutdownGuard {
            shutdown: Some(Box::new(move || registry.shutdown())),
        }
    }
}

/// Runs a registry's shutdown when dropped. Created by [`CacheRegistry::shutdown_guard`].
#[must_use = "shutdown runs when the guard is dropped"]
pub struct ShutdownGuard {
    shutdown: Option<Box<dyn FnOnce() + Send>>,
}

impl ShutdownGuard {
    /// Skip the shutdown.
    pub fn disarm(mut self) {
        self.shutdown = None;
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(shutdown)).is_err() {
            tracing::error!(
                target: "kestrel.registry",
                "cache registry shutdown panicked"
            );
        }
    }
}
