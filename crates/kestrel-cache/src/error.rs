use std::path::PathBuf;
use std::time::Duration;

/// Errors produced by cache management and persistence.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to determine home directory for default cache path")]
    MissingHomeDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {message}")]
    Json { message: String },

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("timed out after {waited:?} waiting for cache lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("incompatible cache schema version: expected {expected}, found {found}")]
    IncompatibleSchemaVersion { expected: u32, found: u32 },
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        // Cache tables hold user paths; keep the category and position but never the
        // offending string values.
        let message = match err.classify() {
            serde_json::error::Category::Io => "i/o failure while reading json".to_string(),
            serde_json::error::Category::Syntax => {
                format!("syntax error at line {} column {}", err.line(), err.column())
            }
            serde_json::error::Category::Data => {
                format!("unexpected data at line {} column {}", err.line(), err.column())
            }
            serde_json::error::Category::Eof => "unexpected end of json input".to_string(),
        };
        Self::Json { message }
    }
}
