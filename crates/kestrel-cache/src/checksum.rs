use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::lock::CacheLock;
use crate::path::{canonical_path, path_key};
use crate::util::atomic_write;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Version of the persisted checksum table format.
pub const CHECKSUM_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedChecksums {
    schema_version: u32,
    entries: BTreeMap<String, Fingerprint>,
}

/// Last-observed content fingerprint per absolute source path.
///
/// The table is read from disk once, when the store is opened. Afterwards it lives in memory;
/// [`ChecksumStore::record`] updates it and [`ChecksumStore::save`] writes it back. A missing,
/// unreadable or incompatible file opens as an empty table.
#[derive(Debug)]
pub struct ChecksumStore {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, Fingerprint>>,
}

impl ChecksumStore {
    /// Open the table persisted at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = read_table(&path);
        tracing::debug!(
            target: "kestrel.cache",
            path = %path.display(),
            entries = entries.len(),
            "loaded checksum table"
        );
        Self {
            path: Some(path),
            entries: RwLock::new(entries),
        }
    }

    /// An empty table with no backing file; [`ChecksumStore::save`] is a no-op.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The recorded fingerprint for `file` (canonicalized before lookup).
    pub fn get(&self, file: &Path) -> Option<Fingerprint> {
        let key = path_key(&canonical_path(file));
        self.entries.read().get(&key).cloned()
    }

    /// Whether the recorded fingerprint for `file` equals `current`.
    ///
    /// A file with no record never matches.
    pub fn matches(&self, file: &Path, current: &Fingerprint) -> bool {
        let key = path_key(&canonical_path(file));
        self.entries
            .read()
            .get(&key)
            .is_some_and(|recorded| recorded == current)
    }

    /// Record `fingerprint` as the current content fingerprint for `file`.
    ///
    /// Returns the previously recorded fingerprint, if any.
    pub fn record(&self, file: &Path, fingerprint: Fingerprint) -> Option<Fingerprint> {
        let key = path_key(&canonical_path(file));
        self.entries.write().insert(key, fingerprint)
    }

    /// Fingerprint `file` from disk and record the result.
    pub fn refresh(&self, file: &Path) -> Result<Fingerprint, CacheError> {
        let canonical = canonical_path(file);
        let fingerprint = Fingerprint::from_file(&canonical)?;
        self.entries
            .write()
            .insert(path_key(&canonical), fingerprint.clone());
        Ok(fingerprint)
    }

    pub fn remove(&self, file: &Path) -> Option<Fingerprint> {
        let key = path_key(&canonical_path(file));
        self.entries.write().remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Persist the in-memory table.
    ///
    /// The write happens under a cross-process [`CacheLock`] and replaces the file atomically.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let persisted = PersistedChecksums {
            schema_version: CHECKSUM_SCHEMA_VERSION,
            entries: self.entries.read().clone(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;

        let _lock = CacheLock::acquire(path)?;
        atomic_write(path, &bytes)?;
        tracing::debug!(
            target: "kestrel.cache",
            path = %path.display(),
            entries = persisted.entries.len(),
            "saved checksum table"
        );
        Ok(())
    }
}

fn read_table(path: &Path) -> BTreeMap<String, Fingerprint> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "kestrel.cache",
                    path = %path.display(),
                    error = %err,
                    "failed to read checksum table"
                );
            }
            return BTreeMap::new();
        }
    };

    match serde_json::from_slice::<PersistedChecksums>(&bytes) {
        Ok(persisted) if persisted.schema_version == CHECKSUM_SCHEMA_VERSION => persisted.entries,
        Ok(persisted) => {
            let err = CacheError::IncompatibleSchemaVersion {
                expected: CHECKSUM_SCHEMA_VERSION,
                found: persisted.schema_version,
            };
            tracing::debug!(
                target: "kestrel.cache",
                path = %path.display(),
                error = %err,
                "ignoring checksum table"
            );
            BTreeMap::new()
        }
        Err(err) => {
            tracing::debug!(
                target: "kestrel.cache",
                path = %path.display(),
                error = %CacheError::from(err),
                "ignoring corrupt checksum table"
            );
            BTreeMap::new()
        }
    }
}
