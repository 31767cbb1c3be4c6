use crate::error::CacheError;
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// How long [`CacheLock::acquire`] waits on another process before giving up.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const CONTENTION_WARN_AFTER: Duration = Duration::from_millis(500);

/// Exclusive write lock on one cache file, shared by every thread and process using the cache.
///
/// The OS lock is taken on a sibling `<file>.lock`. Threads of this process first queue on an
/// in-memory set of held files, so only one handle per file ever contends for the OS lock.
/// Released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    target: PathBuf,
}

#[derive(Default)]
struct HeldFiles {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

fn held_files() -> &'static HeldFiles {
    static HELD: OnceLock<HeldFiles> = OnceLock::new();
    HELD.get_or_init(HeldFiles::default)
}

impl CacheLock {
    /// Lock `target` for writing, waiting up to [`LOCK_TIMEOUT`] for other processes.
    pub fn acquire(target: &Path) -> Result<Self, CacheError> {
        Self::acquire_with_timeout(target, LOCK_TIMEOUT)
    }

    pub fn acquire_with_timeout(target: &Path, timeout: Duration) -> Result<Self, CacheError> {
        let held = held_files();
        {
            let mut files = held.held.lock();
            while files.contains(target) {
                held.released.wait(&mut files);
            }
            files.insert(target.to_path_buf());
        }

        match lock_sidecar(&Self::lock_file_path(target), timeout) {
            Ok(file) => Ok(Self {
                file,
                target: target.to_path_buf(),
            }),
            Err(err) => {
                release(target);
                Err(err)
            }
        }
    }

    /// `<target>.lock`
    pub fn lock_file_path(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        release(&self.target);
    }
}

fn release(target: &Path) {
    let held = held_files();
    held.held.lock().remove(target);
    held.released.notify_all();
}

fn lock_sidecar(path: &Path, timeout: Duration) -> Result<File, CacheError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;

    let start = Instant::now();
    let mut warned = false;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => {
                if warned {
                    tracing::debug!(
                        target: "kestrel.cache",
                        path = %path.display(),
                        waited_ms = start.elapsed().as_millis() as u64,
                        "acquired contended cache lock"
                    );
                }
                return Ok(file);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock || is_contended(&err) => {}
            Err(err) => return Err(err.into()),
        }

        let waited = start.elapsed();
        if waited >= timeout {
            return Err(CacheError::LockTimeout {
                path: path.to_path_buf(),
                waited,
            });
        }
        if !warned && waited >= CONTENTION_WARN_AFTER {
            tracing::warn!(
                target: "kestrel.cache",
                path = %path.display(),
                "cache lock is held by another process; waiting"
            );
            warned = true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
