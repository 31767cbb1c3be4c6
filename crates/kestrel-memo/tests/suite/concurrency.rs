use crossbeam_channel as channel;
use kestrel_memo::{BoundedCache, BoundedCacheConfig, CacheLoader, LoadError};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("parse failed")]
struct ParseFailed;

struct SlowParser {
    calls: AtomicUsize,
    fail: bool,
}

impl CacheLoader<String, Arc<String>> for SlowParser {
    type Error = ParseFailed;

    fn load(&self, key: &String) -> Result<Arc<String>, ParseFailed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        if self.fail {
            return Err(ParseFailed);
        }
        Ok(Arc::new(format!("parsed:{key}")))
    }
}

fn config() -> BoundedCacheConfig {
    BoundedCacheConfig::new("sources", 16, Duration::from_secs(600))
}

#[test]
fn concurrent_gets_run_the_loader_once() {
    let parser = Arc::new(SlowParser {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let cache = Arc::new(BoundedCache::new(config(), parser.clone()));

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.get(&"A.java".to_string()).unwrap()
            })
        })
        .collect();

    let values: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
    let first = &values[0];
    assert!(values.iter().all(|v| Arc::ptr_eq(v, first)));
    assert_eq!(first.as_str(), "parsed:A.java");
}

#[test]
fn waiters_share_a_failed_load() {
    let parser = Arc::new(SlowParser {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let cache = Arc::new(BoundedCache::new(config(), parser.clone()));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.get(&"Broken.java".to_string())
            })
        })
        .collect();

    for handle in handles {
        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, LoadError::Loader { .. }), "{err:?}");
    }
    assert!(parser.calls.load(Ordering::SeqCst) >= 1);
    // Failures are not cached.
    assert!(cache.is_empty());
}

#[test]
fn distinct_keys_load_in_parallel_within_the_bound() {
    let parser = Arc::new(SlowParser {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let cache = BoundedCache::new(
        BoundedCacheConfig::new("sources", 8, Duration::from_secs(600)),
        parser.clone(),
    );

    (0..64).into_par_iter().for_each(|i| {
        let key = format!("F{i}.java");
        assert_eq!(cache.get(&key).unwrap().as_str(), format!("parsed:{key}"));
    });

    assert_eq!(parser.calls.load(Ordering::SeqCst), 64);
    assert_eq!(cache.len(), 8);
}

/// Loader that parks until the test releases it, so writes can race the load.
struct Gated {
    started: channel::Sender<()>,
    release: channel::Receiver<()>,
}

impl CacheLoader<u32, &'static str> for Gated {
    type Error = ParseFailed;

    fn load(&self, _key: &u32) -> Result<&'static str, ParseFailed> {
        let _ = self.started.send(());
        let _ = self.release.recv();
        Ok("loaded")
    }
}

fn gated_cache() -> (
    Arc<BoundedCache<u32, &'static str>>,
    channel::Receiver<()>,
    channel::Sender<()>,
) {
    let (started_tx, started_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let cache = BoundedCache::new(
        BoundedCacheConfig::new("gated", 4, Duration::from_secs(600)),
        Gated {
            started: started_tx,
            release: release_rx,
        },
    );
    (Arc::new(cache), started_rx, release_tx)
}

#[test]
fn put_during_load_wins() {
    let (cache, started, release) = gated_cache();

    let loader_cache = cache.clone();
    let loading = thread::spawn(move || loader_cache.get(&1).unwrap());
    started.recv().unwrap();

    cache.put(1, "written");
    release.send(()).unwrap();

    assert_eq!(loading.join().unwrap(), "loaded");
    assert_eq!(cache.get_if_present(&1), Some("written"));
}

#[test]
fn invalidate_during_load_wins() {
    let (cache, started, release) = gated_cache();

    let loader_cache = cache.clone();
    let loading = thread::spawn(move || loader_cache.get(&1).unwrap());
    started.recv().unwrap();

    cache.invalidate(&1);
    release.send(()).unwrap();

    assert_eq!(loading.join().unwrap(), "loaded");
    assert!(!cache.contains_key(&1));
}
