use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// A stable SHA-256 fingerprint stored as a lowercase hex string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the SHA-256 fingerprint of an arbitrary byte slice.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Compute the SHA-256 fingerprint of bytes read from `reader`.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, CacheError> {
        let mut hasher = Sha256::new();
        let mut buf = [0_u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Compute the content fingerprint of a file, streaming it from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Create a fingerprint identifying a project directory.
    ///
    /// Fallback order:
    /// 1. `KESTREL_PROJECT_ID` environment variable (if set and non-empty)
    /// 2. canonicalized `project_root` path
    pub fn for_project_root(project_root: impl AsRef<Path>) -> Result<Self, CacheError> {
        if let Some(id) = std::env::var_os("KESTREL_PROJECT_ID") {
            let id = id.to_string_lossy();
            if !id.trim().is_empty() {
                return Ok(Self::from_bytes(id.as_bytes()));
            }
        }

        let canonical = dunce::canonicalize(project_root)?;
        Ok(Self::from_bytes(canonical.to_string_lossy().as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
