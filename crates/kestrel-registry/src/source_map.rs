use kestrel_cache::{atomic_write, CacheDir, CacheError, CacheLocation, CacheLock};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Version of the persisted source map format.
pub const SOURCE_MAP_SCHEMA_VERSION: u32 = 1;

/// Persistent home of each project's fully-qualified-name to source-path table.
pub trait SourceMapDatabase: Send + Sync + 'static {
    /// The persisted table for `project_root`; empty when nothing was saved yet.
    fn load_source_map(&self, project_root: &Path) -> HashMap<String, String>;

    /// Replace the persisted table for `project_root`. Returns whether the write succeeded.
    fn save_source_map(&self, project_root: &Path, map: &HashMap<String, String>) -> bool;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSourceMap {
    schema_version: u32,
    entries: BTreeMap<String, String>,
}

/// Stores each project's table as `source_map.json` in its cache directory.
#[derive(Clone, Debug, Default)]
pub struct FileSourceMapDatabase {
    location: CacheLocation,
}

impl FileSourceMapDatabase {
    pub fn new(location: CacheLocation) -> Self {
        Self { location }
    }

    /// Path of the table for `project_root`, creating the project's cache directory.
    pub fn path_for(&self, project_root: &Path) -> Result<PathBuf, CacheError> {
        Ok(CacheDir::new(project_root, &self.location)?.source_map_path())
    }

    fn read(&self, project_root: &Path) -> Result<HashMap<String, String>, CacheError> {
        let path = self.path_for(project_root)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };
        let persisted: PersistedSourceMap = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != SOURCE_MAP_SCHEMA_VERSION {
            return Err(CacheError::IncompatibleSchemaVersion {
                expected: SOURCE_MAP_SCHEMA_VERSION,
                found: persisted.schema_version,
            });
        }
        Ok(persisted.entries.into_iter().collect())
    }

    fn write(&self, project_root: &Path, map: &HashMap<String, String>) -> Result<(), CacheError> {
        let path = self.path_for(project_root)?;
        let persisted = PersistedSourceMap {
            schema_version: SOURCE_MAP_SCHEMA_VERSION,
            entries: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;

        let _lock = CacheLock::acquire(&path)?;
        atomic_write(&path, &bytes)
    }
}

impl SourceMapDatabase for FileSourceMapDatabase {
    fn load_source_map(&self, project_root: &Path) -> HashMap<String, String> {
        match self.read(project_root) {
            Ok(map) => map,
            Err(err) => {
                tracing::debug!(
                    target: "kestrel.registry",
                    project_root = %project_root.display(),
                    error = %err,
                    "ignoring unreadable source map"
                );
                HashMap::new()
            }
        }
    }

    fn save_source_map(&self, project_root: &Path, map: &HashMap<String, String>) -> bool {
        match self.write(project_root, map) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    target: "kestrel.registry",
                    project_root = %project_root.display(),
                    error = %err,
                    "failed to save source map"
                );
                false
            }
        }
    }
}

/// In-memory source map of one project.
#[derive(Debug, Default)]
pub struct SourceMapTable {
    entries: RwLock<HashMap<String, String>>,
}

impl SourceMapTable {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn get(&self, fqcn: &str) -> Option<String> {
        self.entries.read().get(fqcn).cloned()
    }

    /// Returns the previous path for `fqcn`, if any.
    pub fn insert(&self, fqcn: impl Into<String>, path: impl Into<String>) -> Option<String> {
        self.entries.write().insert(fqcn.into(), path.into())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.read().clone()
    }
}
