use kestrel_memo::{
    BoundedCache, BoundedCacheConfig, CacheLoader, EvictionDispatcher, EvictionListener,
    RemovalCause,
};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::{Arc, Barrier};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

struct Echo;

impl CacheLoader<String, String> for Echo {
    type Error = Infallible;

    fn load(&self, key: &String) -> Result<String, Infallible> {
        Ok(key.to_uppercase())
    }
}

#[derive(Default)]
struct Journal {
    events: Mutex<Vec<(String, String, RemovalCause, ThreadId)>>,
}

impl EvictionListener<String, String> for Journal {
    fn on_eviction(&self, key: String, value: String, cause: RemovalCause) {
        self.events
            .lock()
            .push((key, value, cause, thread::current().id()));
    }
}

fn cache(
    name: &str,
    dispatcher: &EvictionDispatcher,
    journal: &Arc<Journal>,
) -> BoundedCache<String, String> {
    BoundedCache::new(
        BoundedCacheConfig::new(name, 1, Duration::from_secs(600)),
        Echo,
    )
    .with_listener(journal.clone())
    .with_dispatcher(dispatcher.clone())
}

#[test]
fn listeners_run_on_the_dispatcher_thread() {
    let dispatcher = EvictionDispatcher::spawn("kestrel-evictions");
    let journal = Arc::new(Journal::default());
    let cache = cache("sources", &dispatcher, &journal);

    cache.get(&"a".to_string()).unwrap();
    cache.get(&"b".to_string()).unwrap();
    cache.flush_evictions();

    let events = journal.events.lock();
    assert_eq!(events.len(), 1);
    let (key, value, cause, thread_id) = &events[0];
    assert_eq!((key.as_str(), value.as_str(), *cause), ("a", "A", RemovalCause::Size));
    assert_ne!(*thread_id, thread::current().id());
}

#[test]
fn shared_dispatcher_preserves_order_across_caches() {
    let dispatcher = EvictionDispatcher::spawn("kestrel-evictions");
    let journal = Arc::new(Journal::default());
    let first = cache("first", &dispatcher, &journal);
    let second = cache("second", &dispatcher, &journal);

    first.put("k".into(), "v1".into());
    second.put("k".into(), "w1".into());
    first.put("k".into(), "v2".into());
    second.invalidate(&"k".to_string());
    first.invalidate(&"k".to_string());
    dispatcher.flush();

    let seen: Vec<(String, RemovalCause)> = journal
        .events
        .lock()
        .iter()
        .map(|(_, value, cause, _)| (value.clone(), *cause))
        .collect();
    assert_eq!(
        seen,
        vec![
            ("v1".to_string(), RemovalCause::Replaced),
            ("w1".to_string(), RemovalCause::Explicit),
            ("v2".to_string(), RemovalCause::Explicit),
        ]
    );
}

#[test]
fn re_putting_every_entry_reports_replacements() {
    let dispatcher = EvictionDispatcher::inline();
    let journal = Arc::new(Journal::default());
    let cache = BoundedCache::new(
        BoundedCacheConfig::new("members", 8, Duration::from_secs(600)),
        Echo,
    )
    .with_listener(journal.clone())
    .with_dispatcher(dispatcher);

    for key in ["x", "y", "z"] {
        cache.get(&key.to_string()).unwrap();
    }
    for (key, value) in cache.entries() {
        cache.put(key, value);
    }

    let causes: Vec<_> = journal.events.lock().iter().map(|e| e.2).collect();
    assert_eq!(causes, vec![RemovalCause::Replaced; 3]);
    assert_eq!(cache.len(), 3);
}

/// Stalls the thread emitting any cache event, widening every gap around cache logging.
struct SlowCacheEvents;

impl<S: tracing::Subscriber> Layer<S> for SlowCacheEvents {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() == "kestrel.memo" {
            thread::sleep(Duration::from_millis(5));
        }
    }
}

#[test]
fn racing_put_and_invalidate_are_delivered_in_lock_order() {
    let dispatcher = EvictionDispatcher::spawn("kestrel-evictions");
    let journal = Arc::new(Journal::default());
    let cache = BoundedCache::new(
        BoundedCacheConfig::new("sources", 4, Duration::from_secs(600)),
        Echo,
    )
    .with_listener(journal.clone())
    .with_dispatcher(dispatcher.clone());
    let key = "k".to_string();

    let mut checked = 0;
    for round in 0..20 {
        cache.put(key.clone(), "old".into());
        dispatcher.flush();
        journal.events.lock().clear();

        let barrier = Barrier::new(2);
        thread::scope(|scope| {
            scope.spawn(|| {
                let slow = tracing_subscriber::registry().with(SlowCacheEvents);
                tracing::subscriber::with_default(slow, || {
                    barrier.wait();
                    cache.put(key.clone(), format!("new-{round}"));
                });
            });
            barrier.wait();
            thread::sleep(Duration::from_millis(1));
            cache.invalidate(&key);
        });
        dispatcher.flush();

        if cache.contains_key(&key) {
            // The invalidation won the lock; the put then replaced nothing.
            continue;
        }
        checked += 1;
        let causes: Vec<_> = journal.events.lock().iter().map(|e| e.2).collect();
        assert_eq!(
            causes,
            vec![RemovalCause::Replaced, RemovalCause::Explicit],
            "round {round}: the listener must see the replacement before the invalidation"
        );
    }
    assert!(checked > 0, "the put never ran first");
}
