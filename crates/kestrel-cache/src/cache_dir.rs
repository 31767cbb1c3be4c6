use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use std::path::{Path, PathBuf};

/// Directory (under a project's cache root) holding persisted sources.
pub const SOURCE_CACHE_DIR: &str = "source";

/// File (under a project's cache root) holding the persisted checksum table.
pub const CHECKSUM_DATA_FILENAME: &str = "checksums.json";

/// File (under a project's cache root) holding the persisted source map.
pub const SOURCE_MAP_FILENAME: &str = "source_map.json";

/// Selects the global cache root that per-project directories are created under.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheLocation {
    /// Override the global cache directory (the project hash is still appended).
    pub cache_root_override: Option<PathBuf>,
}

impl CacheLocation {
    pub fn new(cache_root_override: Option<PathBuf>) -> Self {
        Self {
            cache_root_override,
        }
    }

    pub fn from_env() -> Self {
        Self {
            cache_root_override: std::env::var_os("KESTREL_CACHE_DIR").map(PathBuf::from),
        }
    }

    pub fn base(&self) -> Result<PathBuf, CacheError> {
        match &self.cache_root_override {
            Some(root) => Ok(root.clone()),
            None => default_cache_root(),
        }
    }
}

/// The per-project settings directory: `<cache_root>/<project_hash>/`.
#[derive(Clone, Debug)]
pub struct CacheDir {
    project_root: PathBuf,
    project_hash: Fingerprint,
    root: PathBuf,
}

impl CacheDir {
    pub fn new(
        project_root: impl AsRef<Path>,
        location: &CacheLocation,
    ) -> Result<Self, CacheError> {
        let project_root = dunce::canonicalize(project_root)?;
        let project_hash = Fingerprint::for_project_root(&project_root)?;

        let root = location.base()?.join(project_hash.as_str());
        std::fs::create_dir_all(root.join(SOURCE_CACHE_DIR))?;

        Ok(Self {
            project_root,
            project_hash,
            root,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn project_hash(&self) -> &Fingerprint {
        &self.project_hash
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join(SOURCE_CACHE_DIR)
    }

    pub fn checksum_path(&self) -> PathBuf {
        self.root.join(CHECKSUM_DATA_FILENAME)
    }

    pub fn source_map_path(&self) -> PathBuf {
        self.root.join(SOURCE_MAP_FILENAME)
    }
}

pub fn default_cache_root() -> Result<PathBuf, CacheError> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or(CacheError::MissingHomeDir)?;

    Ok(home.join(".kestrel").join("cache"))
}
