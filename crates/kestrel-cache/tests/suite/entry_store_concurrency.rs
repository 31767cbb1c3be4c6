use kestrel_cache::DiskEntryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Unit {
    class_name: String,
    revision: u32,
}

#[test]
fn concurrent_stores_for_distinct_keys_are_all_readable() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(DiskEntryStore::new(tmp.path().join("source")));

    let threads = 32;
    let mut handles = Vec::with_capacity(threads);
    for i in 0..threads {
        let store = store.clone();
        let root = tmp.path().to_path_buf();
        handles.push(thread::spawn(move || {
            let key = root.join(format!("src/Foo{i}.java"));
            let unit = Unit {
                class_name: format!("Foo{i}"),
                revision: i as u32,
            };
            store.store(&key, &unit).unwrap();
            (key, unit)
        }));
    }

    for handle in handles {
        let (key, unit) = handle.join().unwrap();
        assert_eq!(store.load::<Unit>(&key), Some(unit));
    }

    let files = std::fs::read_dir(store.root()).unwrap().count();
    assert_eq!(files, threads);
}

#[test]
fn concurrent_writers_to_one_key_never_expose_torn_entries() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(DiskEntryStore::new(tmp.path().join("source")));
    let key = tmp.path().join("src/Shared.java");

    let writers = 8;
    let iters = 25;
    let mut handles = Vec::with_capacity(writers);
    for writer in 0..writers {
        let store = store.clone();
        let key = key.clone();
        handles.push(thread::spawn(move || {
            for i in 0..iters {
                let unit = Unit {
                    class_name: format!("Shared{writer}"),
                    revision: i,
                };
                store.store(&key, &unit).unwrap();
                // Any reader sees a complete entry from some writer.
                let seen = store.load::<Unit>(&key).expect("entry must decode");
                assert!(seen.class_name.starts_with("Shared"));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let last = store.load::<Unit>(&key).unwrap();
    assert_eq!(last.revision, iters - 1);
}
