//! Concurrency tests for the lookup cache refresh protocol.
//!
//! Two independent `LookupCache` instances share one cache path, as two
//! processes would. The advisory lock is per open file description, so
//! threads in one test process contend the same way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use issueops::io::lookup_cache::{LookupCache, LookupCacheSettings};
use issueops::test_support::StaticLookupSource;

fn settings() -> LookupCacheSettings {
    LookupCacheSettings {
        staleness: Duration::from_secs(90 * 60),
        lock_timeout: Duration::from_secs(5),
        lock_retry: Duration::from_millis(10),
    }
}

/// Forced refreshes race: exactly one fetches and writes, the other observes
/// the fresh snapshot and returns `false`.
#[test]
fn concurrent_forced_refresh_fetches_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("cache").join("workflow-states.json");
    let source = Arc::new(
        StaticLookupSource::new(&[("Done", "st_done"), ("In Review", "st_review")])
            .with_delay(Duration::from_millis(300)),
    );
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let cache = LookupCache::new(&path, settings());
            let source = Arc::clone(&source);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.refresh(source.as_ref(), true)
            })
        })
        .collect();
    let results: Vec<bool> = handles
        .into_iter()
        .map(|h| h.join().expect("refresh thread"))
        .collect();

    assert_eq!(results.iter().filter(|refreshed| **refreshed).count(), 1);
    assert_eq!(source.fetches(), 1);
    let snapshot = LookupCache::new(&path, settings())
        .load()
        .expect("load")
        .expect("snapshot");
    assert_eq!(snapshot.name_to_id["Done"], "st_done");
    assert_eq!(snapshot.metadata.source_groups, vec!["team-core"]);
}

/// A reader polling during repeated refreshes never sees a partial file.
#[test]
fn readers_never_observe_partial_snapshots() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("workflow-states.json");
    let states: Vec<(String, String)> = (0..200)
        .map(|i| (format!("State {i}"), format!("st_{i}")))
        .collect();
    let pairs: Vec<(&str, &str)> = states
        .iter()
        .map(|(name, id)| (name.as_str(), id.as_str()))
        .collect();
    let source = StaticLookupSource::new(&pairs);
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let cache = LookupCache::new(&path, settings());
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0usize;
            while !done.load(Ordering::SeqCst) {
                if let Some(snapshot) = cache.load().expect("snapshot must always parse") {
                    assert_eq!(snapshot.name_to_id.len(), 200);
                    reads += 1;
                }
            }
            reads
        })
    };

    let writer = LookupCache::new(&path, settings());
    for _ in 0..50 {
        assert!(writer.refresh(&source, true));
    }
    done.store(true, Ordering::SeqCst);
    reader.join().expect("reader thread");
    assert_eq!(source.fetches(), 50);
}

/// A second non-forced refresh within the staleness window is a no-op.
#[test]
fn fresh_cache_is_not_rewritten() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cache = LookupCache::new(temp.path().join("states.json"), settings());
    let source = StaticLookupSource::new(&[("Done", "st_done")]);

    assert!(cache.refresh(&source, false));
    let before = std::fs::metadata(cache.path())
        .and_then(|m| m.modified())
        .expect("mtime");
    assert!(!cache.refresh(&source, false));
    let after = std::fs::metadata(cache.path())
        .and_then(|m| m.modified())
        .expect("mtime");

    assert_eq!(before, after);
    assert_eq!(source.fetches(), 1);
    assert!(!cache.needs_refresh());
}
