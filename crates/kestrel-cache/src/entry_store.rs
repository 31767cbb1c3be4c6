use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::path::{canonical_path, path_key};
use crate::util::{atomic_write, decode, encode, now_millis, BINCODE_PAYLOAD_LIMIT_BYTES};
use crate::KESTREL_VERSION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Version of the on-disk entry envelope.
pub const ENTRY_SCHEMA_VERSION: u32 = 1;

/// File extension of persisted entries.
pub const CACHE_EXT: &str = ".src";

#[derive(Debug, Serialize)]
struct PersistedEntry<'a, T> {
    schema_version: u32,
    kestrel_version: &'a str,
    saved_at_millis: u64,
    key: &'a str,
    payload: &'a T,
}

#[derive(Debug, Deserialize)]
struct PersistedEntryOwned<T> {
    schema_version: u32,
    kestrel_version: String,
    saved_at_millis: u64,
    key: String,
    payload: T,
}

/// Flat, hashed, versioned payload store keyed by source file path.
///
/// Layout: `<root>/<sha256(canonical path)>.src`. File names are a one-way hash of the key,
/// so keys can never escape `root` and long paths never hit filesystem name limits. Each file
/// also stores the full key; a (theoretical) hash collision is reported as a miss without
/// touching the other key's file.
#[derive(Clone, Debug)]
pub struct DiskEntryStore {
    root: PathBuf,
}

impl DiskEntryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of the entry for `key`.
    pub fn entry_path(&self, key: &Path) -> PathBuf {
        let key = path_key(&canonical_path(key));
        self.root.join(hashed_file_name(&key))
    }

    /// Load the payload stored for `key`.
    ///
    /// Any failure (missing file, corruption, version drift, collision) is a miss. Unusable
    /// files are deleted so they don't accumulate.
    pub fn load<T: DeserializeOwned>(&self, key: &Path) -> Option<T> {
        let key = path_key(&canonical_path(key));
        let path = self.root.join(hashed_file_name(&key));
        let bytes = read_entry(&path)?;

        let persisted: PersistedEntryOwned<T> = match decode(&bytes) {
            Ok(persisted) => persisted,
            Err(err) => {
                tracing::debug!(
                    target: "kestrel.cache",
                    path = %path.display(),
                    error = %err,
                    "cache entry does not decode"
                );
                discard(&path, "undecodable");
                return None;
            }
        };

        if persisted.schema_version != ENTRY_SCHEMA_VERSION {
            discard(&path, "schema version");
            return None;
        }
        if persisted.kestrel_version != KESTREL_VERSION {
            discard(&path, "kestrel version");
            return None;
        }
        if persisted.key != key {
            tracing::debug!(
                target: "kestrel.cache",
                path = %path.display(),
                "cache entry belongs to a different key; treating as miss"
            );
            return None;
        }

        tracing::trace!(
            target: "kestrel.cache",
            path = %path.display(),
            saved_at_millis = persisted.saved_at_millis,
            "loaded cache entry"
        );
        Some(persisted.payload)
    }

    /// Persist `payload` for `key`, replacing any previous entry atomically.
    pub fn store<T: Serialize>(&self, key: &Path, payload: &T) -> Result<PathBuf, CacheError> {
        let key = path_key(&canonical_path(key));
        let path = self.root.join(hashed_file_name(&key));
        let persisted = PersistedEntry {
            schema_version: ENTRY_SCHEMA_VERSION,
            kestrel_version: KESTREL_VERSION,
            saved_at_millis: now_millis(),
            key: &key,
            payload,
        };

        let bytes = encode(&persisted)?;
        atomic_write(&path, &bytes)?;
        Ok(path)
    }

    /// Delete the entry for `key`. Returns whether a file was removed.
    pub fn remove(&self, key: &Path) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Entry bytes, or `None` when the file is missing, unreadable or larger than the codec limit.
fn read_entry(path: &Path) -> Option<Vec<u8>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "kestrel.cache",
                    path = %path.display(),
                    error = %err,
                    "failed to open cache entry"
                );
            }
            return None;
        }
    };

    let limit = BINCODE_PAYLOAD_LIMIT_BYTES as u64;
    let mut bytes = Vec::new();
    if let Err(err) = file.take(limit + 1).read_to_end(&mut bytes) {
        tracing::debug!(
            target: "kestrel.cache",
            path = %path.display(),
            error = %err,
            "failed to read cache entry"
        );
        return None;
    }
    if bytes.len() as u64 > limit {
        discard(path, "oversized");
        return None;
    }
    Some(bytes)
}

fn discard(path: &Path, reason: &'static str) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::debug!(
                target: "kestrel.cache",
                path = %path.display(),
                reason,
                error = %err,
                "failed to discard cache entry"
            );
        }
    }
}

fn hashed_file_name(key: &str) -> String {
    let fingerprint = Fingerprint::from_bytes(key.as_bytes());
    format!("{}{CACHE_EXT}", fingerprint.as_str())
}
