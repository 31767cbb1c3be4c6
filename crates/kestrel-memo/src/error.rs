use std::sync::Arc;

/// Failure to produce a value for a cache miss.
///
/// `LoadError` is `Clone` so a single failed load can be handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("loader for cache `{cache}` failed: {source}")]
    Loader {
        cache: String,
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
    #[error("loader for cache `{cache}` panicked")]
    Panicked { cache: String },
}

impl LoadError {
    /// Name of the cache whose loader failed.
    pub fn cache_name(&self) -> &str {
        match self {
            LoadError::Loader { cache, .. } | LoadError::Panicked { cache } => cache,
        }
    }

    /// The loader's own error, if it returned one (rather than panicking).
    pub fn loader_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            LoadError::Loader { source, .. } => Some(source.as_ref()),
            LoadError::Panicked { .. } => None,
        }
    }
}
