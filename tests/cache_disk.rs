//! Disk cache behaviour against a real temp directory:
//!   - TTL boundary (age == TTL is fresh, age > TTL is a miss)
//!   - size budget evicts oldest first and never the entry just written
//!   - purge / cleanup
//!   - damaged files degrade to a miss

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use deep_research::cache::disk::DiskCache;
use deep_research::cache::{CacheKey, CachePolicy, CacheStore, ManualClock};

const T0: u64 = 1_700_000_000_000;

fn key(s: &str) -> CacheKey {
    CacheKey::for_identifier(s)
}

fn open(dir: &std::path::Path, ttl_secs: u64, max_bytes: u64) -> (DiskCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let cache = DiskCache::with_clock(
        dir,
        CachePolicy::new(Duration::from_secs(ttl_secs), max_bytes),
        clock.clone(),
    )
    .expect("open cache");
    (cache, clock)
}

#[test]
fn ttl_boundary_is_strict() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, clock) = open(dir.path(), 60, 1 << 20);
    let k = key("https://example.org/a");
    cache.put(&k, "text/html", b"<p>hello</p>").unwrap();

    clock.advance(Duration::from_secs(60));
    let hit = cache.get(&k).expect("age == ttl is still fresh");
    assert_eq!(hit.payload, b"<p>hello</p>");
    assert_eq!(hit.content_type, "text/html");

    clock.advance(Duration::from_secs(1));
    assert!(cache.get(&k).is_none(), "age > ttl must miss");
    assert_eq!(cache.len(), 0);
}

#[test]
fn eviction_is_oldest_first_and_spares_new_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, clock) = open(dir.path(), 3600, 100);
    let (a, b, c) = (key("a"), key("b"), key("c"));

    cache.put(&a, "text/plain", &[b'a'; 40]).unwrap();
    clock.advance(Duration::from_secs(1));
    cache.put(&b, "text/plain", &[b'b'; 40]).unwrap();
    clock.advance(Duration::from_secs(1));
    cache.put(&c, "text/plain", &[b'c'; 40]).unwrap();

    assert!(cache.get(&a).is_none(), "oldest entry evicted");
    assert!(cache.get(&b).is_some());
    assert!(cache.get(&c).is_some());
    assert!(cache.total_bytes() <= 100);

    // A single entry larger than the whole budget is kept; everything else goes.
    clock.advance(Duration::from_secs(1));
    let big = key("big");
    cache.put(&big, "text/plain", &[b'x'; 150]).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.get(&big).is_some());
}

#[test]
fn entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let k = key("persisted");
    {
        let (cache, _) = open(dir.path(), 3600, 1 << 20);
        cache.put(&k, "application/json", br#"{"ok":true}"#).unwrap();
    }
    let (cache, _) = open(dir.path(), 3600, 1 << 20);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&k).unwrap().payload, br#"{"ok":true}"#);
}

#[test]
fn purge_and_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, clock) = open(dir.path(), 60, 1 << 20);
    cache.put(&key("old"), "text/plain", b"old").unwrap();
    clock.advance(Duration::from_secs(120));
    cache.put(&key("new"), "text/plain", b"new").unwrap();

    let report = cache.cleanup().unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.evicted, 0);
    assert_eq!(report.remaining_entries, 1);
    assert_eq!(report.remaining_bytes, 3);
    assert!(cache.get(&key("new")).is_some());

    assert_eq!(cache.purge().unwrap(), 1);
    assert!(cache.is_empty());
    assert!(cache.get(&key("new")).is_none());
}

#[test]
fn damaged_entry_is_a_miss_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, _) = open(dir.path(), 3600, 1 << 20);
    let k = key("damaged");
    cache.put(&k, "text/plain", b"intact payload").unwrap();

    let file = dir.path().join(format!("{}.entry", k.as_str()));
    let mut bytes = fs::read(&file).unwrap();
    bytes.truncate(bytes.len() - 4);
    fs::write(&file, bytes).unwrap();

    assert!(cache.get(&k).is_none());
    assert!(!file.exists(), "damaged file removed");

    // Garbage on disk at open time is dropped, and stale temp files are swept.
    fs::write(dir.path().join("junk.entry"), b"not a header").unwrap();
    fs::write(dir.path().join(".x.entry.1.deadbeef.tmp"), b"partial").unwrap();
    let (reopened, _) = open(dir.path(), 3600, 1 << 20);
    assert!(reopened.is_empty());
    assert!(!dir.path().join("junk.entry").exists());
    assert!(!dir.path().join(".x.entry.1.deadbeef.tmp").exists());
}

#[test]
fn concurrent_same_key_reads_see_whole_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(
        dir.path(),
        CachePolicy::new(Duration::from_secs(3600), 1 << 24),
    )
    .unwrap();
    let k = key("https://example.org/contended");
    let small = vec![b'a'; 40 * 1024];
    let large = vec![b'b'; 90 * 1024];

    std::thread::scope(|s| {
        for w in 0..3 {
            let (cache, k, small, large) = (&cache, &k, &small, &large);
            s.spawn(move || {
                for i in 0..40 {
                    if (i + w) % 2 == 0 {
                        cache.put(k, "text/plain", small).unwrap();
                    } else {
                        cache.put(k, "text/html", large).unwrap();
                    }
                }
            });
        }
        for _ in 0..3 {
            let (cache, k, small, large) = (&cache, &k, &small, &large);
            s.spawn(move || {
                for _ in 0..200 {
                    if let Some(hit) = cache.get(k) {
                        match hit.content_type.as_str() {
                            "text/plain" => assert_eq!(&hit.payload, small),
                            "text/html" => assert_eq!(&hit.payload, large),
                            other => panic!("unexpected content type {other}"),
                        }
                        assert_eq!(hit.size, hit.payload.len() as u64);
                    }
                }
            });
        }
    });

    let last = cache.get(&k).expect("entry present after writers finish");
    assert!(last.payload == small || last.payload == large);
    assert_eq!(cache.len(), 1);
    let leftovers = fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "tmp"))
        .count();
    assert_eq!(leftovers, 0);
}
