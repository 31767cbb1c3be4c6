//! Process-wide entry point to Kestrel's analysis caches.
//!
//! [`CacheRegistry`] owns:
//! - one bounded source cache per project root, backed by the disk tier from `kestrel-cache`
//!   through a [`SourceCacheLoader`];
//! - one [`MemberDescriptorCache`] shared by every project, initialized explicitly with
//!   [`CacheRegistry::setup_member_cache`];
//! - one fully-qualified-name to source-path table per project, hydrated from a
//!   [`SourceMapDatabase`] on first use.
//!
//! The analysis payloads themselves are opaque: callers describe them through the [`Project`]
//! and [`SourceUnit`] traits.

mod error;
mod member;
mod project;
mod registry;
mod source_loader;
mod source_map;
mod stats;

pub use error::{RegistryError, Result};
pub use member::{MemberCacheLoader, MemberDescriptorCache, MemberLoader, MEMBER_CACHE_MAX};
pub use project::{Project, SourceUnit};
pub use registry::{CacheRegistry, ShutdownGuard, EVICTION_THREAD_NAME};
pub use source_loader::SourceCacheLoader;
pub use source_map::{
    FileSourceMapDatabase, SourceMapDatabase, SourceMapTable, SOURCE_MAP_SCHEMA_VERSION,
};
pub use stats::SourceCacheStats;

pub use kestrel_memo::RemovalCause;
