use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing how a project's source cache used its disk tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceCacheStats {
    /// Loads served from a checksum-valid disk entry.
    pub disk_hits: u64,
    /// Loads where the disk tier had nothing usable (no record, stale checksum, missing or
    /// corrupt entry).
    pub disk_misses: u64,
    /// Calls into the project's parser.
    pub parses: u64,
    /// Entries written back on eviction or replacement.
    pub write_backs: u64,
    pub write_failures: u64,
    /// Disk entries deleted on explicit invalidation.
    pub removals: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AtomicSourceCacheStats {
    pub(crate) disk_hits: AtomicU64,
    pub(crate) disk_misses: AtomicU64,
    pub(crate) parses: AtomicU64,
    pub(crate) write_backs: AtomicU64,
    pub(crate) write_failures: AtomicU64,
    pub(crate) removals: AtomicU64,
}

impl AtomicSourceCacheStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SourceCacheStats {
        SourceCacheStats {
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            disk_misses: self.disk_misses.load(Ordering::Relaxed),
            parses: self.parses.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
        }
    }
}
