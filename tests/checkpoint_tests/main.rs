//! Tests for CheckpointCoordinator
//!
//! These tests verify:
//! - A cycle durably flushes dirty pages and clears their dirty flag
//! - Back-to-back cycles leave identical bytes on disk
//! - Checkpoint records carry the LSN watermark
//! - A failed page flush writes no record and keeps the page dirty
//! - Parallel flushing and background workers

#[path = "../common/mod.rs"]
mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use walstore::checkpoint::{CheckpointCoordinator, CheckpointPhase, CheckpointRecord};
use walstore::config::{CachePolicy, Config};
use walstore::event_log::EventLog;
use walstore::metrics::Counter;
use walstore::page::PageStore;
use walstore::shutdown::ShutdownSignal;
use walstore::wal::LsnAllocator;

use common::{log_lines, open_store, wait_until, RecordingMetrics, TEST_PAGE_SIZE};

// =============================================================================
// Helper Functions
// =============================================================================

struct Setup {
    temp: TempDir,
    store: Arc<PageStore>,
    lsn: Arc<LsnAllocator>,
    metrics: Arc<RecordingMetrics>,
    coordinator: Arc<CheckpointCoordinator>,
}

fn setup(cache_capacity: usize, flush_threads: usize) -> Setup {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .page_size(TEST_PAGE_SIZE)
        .page_count(10)
        .cache_capacity(cache_capacity)
        .cache_policy(CachePolicy::Lru)
        .build();
    let metrics = RecordingMetrics::new();
    let store = Arc::new(open_store(&temp.path().join("pages"), &config, metrics.clone()));
    let lsn = Arc::new(LsnAllocator::default());
    let events = Arc::new(EventLog::open(&temp.path().join("events.log")).unwrap());

    let coordinator = Arc::new(
        CheckpointCoordinator::open(
            &temp.path().join("checkpoint.log"),
            Arc::clone(&store),
            Arc::clone(&lsn),
            None,
            flush_threads,
            metrics.clone(),
            events,
        )
        .unwrap(),
    );

    Setup {
        temp,
        store,
        lsn,
        metrics,
        coordinator,
    }
}

fn checkpoint_records(setup: &Setup) -> Vec<CheckpointRecord> {
    log_lines(setup.coordinator.log_path())
        .iter()
        .map(|line| line.parse().unwrap())
        .collect()
}

fn disk_bytes(setup: &Setup) -> Vec<Vec<u8>> {
    (0..10)
        .map(|id| fs::read(setup.store.page_path(id)).unwrap())
        .collect()
}

// =============================================================================
// Cycle Tests
// =============================================================================

#[test]
fn test_cycle_clears_dirty_flags() {
    let s = setup(0, 1);
    s.store.write_page(3, b"three").unwrap();
    s.store.write_page(8, b"eight").unwrap();
    assert_eq!(s.store.dirty_pages().unwrap(), vec![3, 8]);

    let report = s.coordinator.run_cycle(0).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.pages_flushed, 2);
    assert!(report.pages_failed.is_empty());
    assert!(!s.store.is_dirty(3).unwrap());
    assert!(!s.store.is_dirty(8).unwrap());
    assert!(s.store.dirty_pages().unwrap().is_empty());
    assert_eq!(s.coordinator.phase(), CheckpointPhase::Idle);
    assert_eq!(s.metrics.get(Counter::Checkpoints), 1);
}

#[test]
fn test_cycle_includes_cached_pages() {
    let s = setup(4, 1);
    s.store.fetch_page(1).unwrap();
    s.store.write_page(2, b"two").unwrap();

    let report = s.coordinator.run_cycle(0).unwrap();

    // Page 1 is cached but clean, page 2 is dirty and cached
    assert_eq!(report.pages_flushed, 2);
    assert_eq!(report.record.unwrap().dirty_page_count, 1);
}

#[test]
fn test_back_to_back_cycles_are_idempotent() {
    let s = setup(4, 1);
    for id in 0..10u32 {
        s.store
            .write_page(id, format!("page-{}", id).as_bytes())
            .unwrap();
    }

    s.coordinator.run_cycle(0).unwrap();
    let first = disk_bytes(&s);
    s.coordinator.run_cycle(0).unwrap();
    let second = disk_bytes(&s);

    assert_eq!(first, second);
    assert_eq!(checkpoint_records(&s).len(), 2);
}

#[test]
fn test_record_carries_lsn_watermark() {
    let s = setup(0, 1);
    for _ in 0..7 {
        s.lsn.allocate();
    }
    s.store.write_page(0, b"x").unwrap();

    let report = s.coordinator.run_cycle(5).unwrap();
    let records = checkpoint_records(&s);

    assert_eq!(records.len(), 1);
    assert_eq!(Some(records[0]), report.record);
    assert_eq!(records[0].lsn_watermark, 7);
    assert_eq!(records[0].thread_id, 5);
    assert_eq!(records[0].dirty_page_count, 1);
}

#[test]
fn test_empty_cycle_still_logs() {
    let s = setup(0, 1);

    let report = s.coordinator.run_cycle(0).unwrap();

    assert_eq!(report.pages_flushed, 0);
    assert_eq!(checkpoint_records(&s)[0].dirty_page_count, 0);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_failed_flush_writes_no_record() {
    let s = setup(0, 1);
    s.store.write_page(2, b"fine").unwrap();
    s.store.write_page(5, b"doomed").unwrap();
    fs::remove_file(s.store.page_path(5)).unwrap();

    let report = s.coordinator.run_cycle(0).unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.pages_flushed, 1);
    assert_eq!(report.pages_failed, vec![5]);
    assert!(!s.store.is_dirty(2).unwrap());
    assert!(s.store.is_dirty(5).unwrap());
    assert!(checkpoint_records(&s).is_empty());
    assert_eq!(s.metrics.get(Counter::Errors), 1);
    assert_eq!(s.metrics.get(Counter::Checkpoints), 0);

    // The next cycle retries the still-dirty page
    s.store.write_page(5, b"restored").unwrap();
    let report = s.coordinator.run_cycle(0).unwrap();
    assert!(report.is_complete());
    assert!(!s.store.is_dirty(5).unwrap());
}

// =============================================================================
// Parallel / Background Tests
// =============================================================================

#[test]
fn test_parallel_flush_threads() {
    let s = setup(0, 4);
    for id in 0..10u32 {
        s.store.write_page(id, b"parallel").unwrap();
    }

    let report = s.coordinator.run_cycle(0).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.pages_flushed, 10);
    assert!(s.store.dirty_pages().unwrap().is_empty());
}

#[test]
fn test_background_workers_run_until_shutdown() {
    let s = setup(4, 1);
    let shutdown = Arc::new(ShutdownSignal::new());
    s.store.write_page(4, b"background").unwrap();

    let handles = s
        .coordinator
        .spawn_workers(2, Duration::from_millis(20), &shutdown)
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        s.metrics.get(Counter::Checkpoints) >= 3
    }));
    assert!(!s.store.is_dirty(4).unwrap());

    shutdown.request();
    for handle in handles {
        handle.join().unwrap();
    }

    let records = checkpoint_records(&s);
    assert!(records.len() >= 3);
    assert!(records.iter().all(|r| r.thread_id < 2));
    assert!(s.temp.path().join("checkpoint.log").exists());
}
