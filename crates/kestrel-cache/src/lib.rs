//! Disk tier for Kestrel's analysis caches.
//!
//! This crate owns everything that touches the filesystem on behalf of the in-memory caches:
//! - per-project cache directories ([`CacheDir`])
//! - content fingerprints ([`Fingerprint`]) and the persisted [`ChecksumStore`]
//! - the hashed, versioned per-file payload store ([`DiskEntryStore`])
//!
//! Every read in this crate is best-effort: corruption, schema drift and I/O errors degrade to
//! a cache miss. Writes report errors to the caller, which decides whether they matter.
//!
//! ## On-disk layout (inventory)
//!
//! Project-scoped caches live under `<cache_root>/<project_hash>/`:
//! - `source/<sha256(canonical path)>.src`:
//!   - [`DiskEntryStore`] envelopes persisted via `serde` + `bincode`
//!   - gated by [`ENTRY_SCHEMA_VERSION`] and [`KESTREL_VERSION`]
//! - `checksums.json`:
//!   - [`ChecksumStore`], schema [`CHECKSUM_SCHEMA_VERSION`]
//! - `source_map.json`:
//!   - fully-qualified name to source path table owned by the project database

mod cache_dir;
mod checksum;
mod entry_store;
mod error;
mod fingerprint;
mod lock;
mod path;
mod util;

pub use cache_dir::{
    default_cache_root, CacheDir, CacheLocation, CHECKSUM_DATA_FILENAME, SOURCE_CACHE_DIR,
    SOURCE_MAP_FILENAME,
};
pub use checksum::{ChecksumStore, CHECKSUM_SCHEMA_VERSION};
pub use entry_store::{DiskEntryStore, CACHE_EXT, ENTRY_SCHEMA_VERSION};
pub use error::CacheError;
pub use fingerprint::Fingerprint;
pub use lock::{CacheLock, LOCK_TIMEOUT};
pub use path::{canonical_path, path_key};
pub use util::{atomic_write, BINCODE_PAYLOAD_LIMIT_BYTES};

/// Version string stamped into every persisted artifact. Artifacts written by a different
/// version are treated as cache misses.
pub const KESTREL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub type Result<T> = std::result::Result<T, CacheError>;
