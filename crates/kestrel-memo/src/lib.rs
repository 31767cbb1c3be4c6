//! Bounded, idle-expiring in-memory caches with loader and eviction hooks.
//!
//! [`BoundedCache`] is the building block for Kestrel's per-project source caches and the
//! shared member-descriptor cache:
//! - entries are bounded by count and evicted least-recently-used first;
//! - entries idle for longer than the configured duration expire lazily;
//! - misses are filled by a [`CacheLoader`], at most once per key at a time;
//! - every removal is reported to an [`EvictionListener`] with its [`RemovalCause`].
//!
//! Listeners never run under the cache lock. Removal notifications are handed to an
//! [`EvictionDispatcher`], which runs them in submission order on a dedicated thread.

mod cache;
mod dispatch;
mod error;
mod listener;
mod ticker;

pub use cache::{BoundedCache, BoundedCacheConfig};
pub use dispatch::{Deferred, EvictionDispatcher};
pub use error::LoadError;
pub use listener::{CacheLoader, EvictionListener, NoopListener, RemovalCause};
pub use ticker::{ManualTicker, SystemTicker, Ticker};
