use std::path::{Path, PathBuf};

/// Canonicalize `path` for use as a cache key.
///
/// Files that no longer exist (or cannot be resolved) fall back to an absolute, lexically
/// cleaned path so keys stay stable for deleted files.
pub fn canonical_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match dunce::canonicalize(path) {
        Ok(canonical) => canonical,
        Err(_) => {
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                match std::env::current_dir() {
                    Ok(cwd) => cwd.join(path),
                    Err(_) => path.to_path_buf(),
                }
            };
            lexically_normalize(&absolute)
        }
    }
}

/// Stable string form of a (canonical) path used inside persisted tables.
///
/// Separators are normalized to `/` so tables written on one platform stay readable.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn lexically_normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
