use crate::project::Project;
use crate::stats::{AtomicSourceCacheStats, SourceCacheStats};
use kestrel_cache::{canonical_path, CacheDir, ChecksumStore, DiskEntryStore, Fingerprint};
use kestrel_memo::{CacheLoader, EvictionListener, RemovalCause};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Loader and eviction listener for one project's source cache.
///
/// Misses are served from disk when the file's current fingerprint matches the recorded one,
/// and parsed otherwise. Evicted and replaced sources are written back to disk; explicitly
/// invalidated sources have their disk entry deleted. Disk problems never fail a load.
pub struct SourceCacheLoader<P: Project> {
    project: Arc<P>,
    entries: Option<DiskEntryStore>,
    checksums: Arc<ChecksumStore>,
    stats: AtomicSourceCacheStats,
}

impl<P: Project> SourceCacheLoader<P> {
    /// A loader backed by the project's cache directory.
    ///
    /// The checksum table is read from `cache_dir` once, here.
    pub fn new(project: Arc<P>, cache_dir: &CacheDir) -> Self {
        Self {
            project,
            entries: Some(DiskEntryStore::new(cache_dir.source_dir())),
            checksums: Arc::new(ChecksumStore::open(cache_dir.checksum_path())),
            stats: AtomicSourceCacheStats::default(),
        }
    }

    /// A loader that always parses and never touches the disk.
    pub fn without_disk(project: Arc<P>) -> Self {
        Self {
            project,
            entries: None,
            checksums: Arc::new(ChecksumStore::in_memory()),
            stats: AtomicSourceCacheStats::default(),
        }
    }

    pub fn project(&self) -> &Arc<P> {
        &self.project
    }

    pub fn uses_disk(&self) -> bool {
        self.entries.is_some()
    }

    pub fn checksums(&self) -> &Arc<ChecksumStore> {
        &self.checksums
    }

    /// Where the disk entry for `file` lives, if the disk tier is enabled.
    pub fn entry_path(&self, file: &Path) -> Option<PathBuf> {
        self.entries.as_ref().map(|entries| entries.entry_path(file))
    }

    pub fn stats(&self) -> SourceCacheStats {
        self.stats.snapshot()
    }

    fn load_from_disk(&self, entries: &DiskEntryStore, file: &Path) -> Option<P::Source> {
        let current = match Fingerprint::from_file(file) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                tracing::debug!(
                    target: "kestrel.registry",
                    file = %file.display(),
                    error = %err,
                    "failed to fingerprint source file"
                );
                return None;
            }
        };
        if !self.checksums.matches(file, &current) {
            tracing::trace!(
                target: "kestrel.registry",
                file = %file.display(),
                "checksum missing or stale; skipping disk cache"
            );
            return None;
        }
        entries.load(file)
    }

    fn parse(&self, file: &Path) -> Result<P::Source, P::Error> {
        AtomicSourceCacheStats::bump(&self.stats.parses);
        self.project.parse_file(file)
    }
}

impl<P: Project> CacheLoader<PathBuf, P::Source> for SourceCacheLoader<P> {
    type Error = P::Error;

    fn load(&self, file: &PathBuf) -> Result<P::Source, P::Error> {
        let Some(entries) = &self.entries else {
            return self.parse(file);
        };

        let canonical = canonical_path(file);
        if let Some(source) = self.load_from_disk(entries, &canonical) {
            AtomicSourceCacheStats::bump(&self.stats.disk_hits);
            tracing::trace!(
                target: "kestrel.registry",
                file = %canonical.display(),
                "loaded source from disk cache"
            );
            return Ok(source);
        }

        AtomicSourceCacheStats::bump(&self.stats.disk_misses);
        self.parse(&canonical)
    }
}

impl<P: Project> EvictionListener<PathBuf, P::Source> for SourceCacheLoader<P> {
    fn on_eviction(&self, file: PathBuf, source: P::Source, cause: RemovalCause) {
        let Some(entries) = &self.entries else {
            return;
        };

        match cause {
            RemovalCause::Expired | RemovalCause::Size | RemovalCause::Replaced => {
                match entries.store(&file, &source) {
                    Ok(path) => {
                        AtomicSourceCacheStats::bump(&self.stats.write_backs);
                        tracing::trace!(
                            target: "kestrel.registry",
                            file = %file.display(),
                            path = %path.display(),
                            cause = cause.as_str(),
                            "wrote source back to disk cache"
                        );
                    }
                    Err(err) => {
                        AtomicSourceCacheStats::bump(&self.stats.write_failures);
                        tracing::warn!(
                            target: "kestrel.registry",
                            file = %file.display(),
                            cause = cause.as_str(),
                            error = %err,
                            "failed to write source to disk cache"
                        );
                    }
                }
            }
            RemovalCause::Explicit => match entries.remove(&file) {
                Ok(true) => AtomicSourceCacheStats::bump(&self.stats.removals),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        target: "kestrel.registry",
                        file = %file.display(),
                        error = %err,
                        "failed to delete disk cache entry"
                    );
                }
            },
        }
    }
}
