//! Tests for PageCache
//!
//! These tests verify:
//! - Coherence with the store after every write
//! - Capacity bounds under both policies
//! - Hit/miss accounting
//! - Entries are replaced, never patched

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use walstore::config::CachePolicy;
use walstore::error::StoreError;
use walstore::metrics::Counter;
use walstore::page::{trim_padding, PageCache};

use crate::common::{padded, setup_store, RecordingMetrics};

// =============================================================================
// Coherence Tests
// =============================================================================

#[test]
fn test_write_refreshes_cached_copy() {
    let (_temp, store, _metrics) = setup_store(4, CachePolicy::Lru);

    store.write_page(3, b"version 1").unwrap();
    store.fetch_page(3).unwrap();
    store.write_page(3, b"version 2").unwrap();

    let cached = store.cache().try_get(3).unwrap();
    assert_eq!(cached.as_ref(), padded(b"version 2").as_slice());
}

#[test]
fn test_cache_matches_every_write() {
    let (_temp, store, _metrics) = setup_store(4, CachePolicy::Lru);

    for round in 0..20u32 {
        let id = round % 10;
        let payload = format!("round={}", round);
        store.write_page(id, payload.as_bytes()).unwrap();

        if let Some(cached) = store.cache().try_get(id) {
            assert_eq!(trim_padding(&cached), payload.as_bytes());
        }
    }
}

#[test]
fn test_replaced_entry_is_retired() {
    let (_temp, store, _metrics) = setup_store(4, CachePolicy::Lru);

    store.write_page(1, b"old").unwrap();
    let old = store.cache().entry(1).unwrap();
    assert!(old.is_resident());

    store.write_page(1, b"new").unwrap();
    let new = store.cache().entry(1).unwrap();

    assert!(!old.is_resident());
    assert_eq!(trim_padding(old.bytes()), b"old");
    assert!(new.is_resident());
    assert_eq!(trim_padding(new.bytes()), b"new");
}

// =============================================================================
// Capacity Tests
// =============================================================================

#[test]
fn test_no_eviction_serves_from_store_once_full() {
    let (_temp, store, _metrics) = setup_store(2, CachePolicy::NoEviction);

    store.write_page(0, b"zero").unwrap();
    store.write_page(1, b"one").unwrap();
    store.write_page(2, b"two").unwrap();

    assert_eq!(store.cache().len(), 2);
    assert!(store.cache().contains(0));
    assert!(store.cache().contains(1));
    assert!(!store.cache().contains(2));

    // Still readable, just uncached
    assert_eq!(trim_padding(&store.fetch_page(2).unwrap()), b"two");
    assert!(!store.cache().contains(2));
}

#[test]
fn test_no_eviction_insert_reports_cache_full() {
    let cache = PageCache::new(1, CachePolicy::NoEviction, RecordingMetrics::new());

    cache.insert(0, Bytes::from_static(b"a")).unwrap();
    // Replacing a resident page is always allowed
    cache.insert(0, Bytes::from_static(b"b")).unwrap();

    assert!(matches!(
        cache.insert(1, Bytes::from_static(b"c")),
        Err(StoreError::CacheFull { capacity: 1 })
    ));
    assert_eq!(cache.try_get(0).unwrap(), Bytes::from_static(b"b"));
}

#[test]
fn test_lru_evicts_least_recently_used() {
    let (_temp, store, _metrics) = setup_store(2, CachePolicy::Lru);

    store.fetch_page(0).unwrap();
    store.fetch_page(1).unwrap();
    store.fetch_page(0).unwrap();
    store.fetch_page(2).unwrap();

    assert!(store.cache().contains(0));
    assert!(!store.cache().contains(1));
    assert!(store.cache().contains(2));
    assert_eq!(store.cache().len(), 2);
}

#[test]
fn test_disabled_cache() {
    let (_temp, store, metrics) = setup_store(0, CachePolicy::Lru);

    store.write_page(4, b"uncached").unwrap();
    assert_eq!(trim_padding(&store.fetch_page(4).unwrap()), b"uncached");

    assert!(store.cache().is_empty());
    assert!(store.cache().page_ids().is_empty());
    assert_eq!(metrics.get(Counter::CacheHits), 0);
    assert!(matches!(
        store.cache().insert(4, Bytes::new()),
        Err(StoreError::CacheFull { capacity: 0 })
    ));
}

#[test]
fn test_cache_never_exceeds_capacity() {
    for policy in [CachePolicy::Lru, CachePolicy::NoEviction] {
        let (_temp, store, _metrics) = setup_store(3, policy);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4u32)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let id = (worker * 7 + i) % 10;
                        if i % 3 == 0 {
                            store.write_page(id, format!("w{}i{}", worker, i).as_bytes()).unwrap();
                        } else {
                            store.fetch_page(id).unwrap();
                        }
                        assert!(store.cache().len() <= 3);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(store.cache().len() <= 3);
    }
}

// =============================================================================
// Accounting Tests
// =============================================================================

#[test]
fn test_hits_and_misses_are_counted() {
    let (_temp, store, metrics) = setup_store(4, CachePolicy::Lru);

    store.fetch_page(5).unwrap(); // miss, then cached
    store.fetch_page(5).unwrap(); // hit
    store.fetch_page(5).unwrap(); // hit
    store.fetch_page(6).unwrap(); // miss

    assert_eq!(metrics.get(Counter::CacheHits), 2);
    assert_eq!(metrics.get(Counter::CacheMisses), 2);
    assert_eq!(metrics.get(Counter::Reads), 2);
    assert_eq!(store.cache().entry(5).unwrap().reader_count(), 2);
}

#[test]
fn test_returned_bytes_are_copies() {
    let (_temp, store, _metrics) = setup_store(4, CachePolicy::Lru);
    store.write_page(2, b"immutable").unwrap();

    let mut copy = store.cache().try_get(2).unwrap().to_vec();
    copy[0] = b'X';

    assert_eq!(trim_padding(&store.cache().try_get(2).unwrap()), b"immutable");
}
