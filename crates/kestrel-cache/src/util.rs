use crate::error::CacheError;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest entry the disk tier will encode or decode.
///
/// A corrupt length prefix fails to decode instead of allocating.
pub const BINCODE_PAYLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// Fixed-width little-endian bincode, so entry files are byte-identical across platforms.
fn codec() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(BINCODE_PAYLOAD_LIMIT_BYTES as u64)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    Ok(codec().serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    Ok(codec().deserialize(bytes)?)
}

/// Replace `path` with `bytes`; readers see either the previous file or the complete new one.
///
/// The temp file lives next to `path` so the final rename never crosses filesystems. It is
/// removed if anything fails before the rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
