use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// A per-file analysis result held by the source cache.
///
/// The payload is opaque to the caches; it only has to be serializable so evicted entries can be
/// written to disk.
pub trait SourceUnit: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The file this result was produced from.
    fn file(&self) -> &Path;
}

/// The project model the source cache is partitioned by.
pub trait Project: Send + Sync + 'static {
    type Source: SourceUnit;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Project root directory; canonicalized by the registry before use as a partition key.
    fn root(&self) -> &Path;

    /// Parse `file` from scratch.
    fn parse_file(&self, file: &Path) -> Result<Self::Source, Self::Error>;
}
