//! End-to-end workload scenarios
//!
//! These tests verify:
//! - No lost WAL records after a clean shutdown
//! - Every transaction's pre-record precedes its commit in the log
//! - Final page bytes match committed writes
//! - No torn pages through the engine API
//! - Cooperative shutdown of an unbounded workload

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use walstore::config::{Config, WalSyncStrategy};
use walstore::engine::Engine;
use walstore::page::PageId;
use walstore::pipeline::Workload;
use walstore::transaction::payload_transaction_id;
use walstore::wal::{Operation, WalRecord, WalRecovery};

use crate::common::{log_lines, wait_until, TEST_PAGE_SIZE};

// =============================================================================
// Helper Functions
// =============================================================================

fn scenario_config(temp: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp.path())
        .page_size(TEST_PAGE_SIZE)
        .page_count(10)
        .payload_size(64)
        .cache_capacity(4)
        .wal_batch_size(5)
        .checkpoint_interval(Duration::from_millis(200))
        .transaction_workers(4)
        .transaction_delay(Duration::from_millis(1))
        .seed(42)
        .build()
}

/// Committed write records per page, in log order
fn committed_writes(records: &[WalRecord]) -> HashMap<PageId, Vec<&WalRecord>> {
    let mut writes: HashMap<PageId, Vec<&WalRecord>> = HashMap::new();
    for record in records.iter().filter(|r| r.committed && r.operation.is_write()) {
        writes.entry(record.page_id).or_default().push(record);
    }
    writes
}

// =============================================================================
// Workload Scenarios
// =============================================================================

#[test]
fn test_two_hundred_transactions() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open(scenario_config(&temp)).unwrap());

    let summary = Workload::spawn(Arc::clone(&engine), Some(200))
        .unwrap()
        .join();
    engine.close().unwrap();

    let metrics = engine.snapshot_metrics();
    assert_eq!(summary.attempted, 200);
    assert_eq!(metrics.errors, 0);
    assert_eq!(metrics.transactions, 200);

    // No lost records: two per attempted transaction that did not fail
    let lines = log_lines(&engine.wal_path());
    assert_eq!(lines.len() as u64, 2 * (200 - metrics.errors));
    assert_eq!(metrics.wal_records_written, 400);

    let (records, result) = WalRecovery::recover(&engine.wal_path()).unwrap();
    assert_eq!(result.records_corrupted, 0);
    assert_eq!(result.duplicate_records, 0);
    assert_eq!(result.committed_transactions, 200);
    assert!(result.incomplete_transactions.is_empty());
    assert!(result.ordering_violations.is_empty());

    // Every page holds bytes from some committed write to it, or is zeroed
    let writes = committed_writes(&records);
    for page_id in 0..10 {
        let page = engine.store().page(page_id).unwrap();
        let page_writes = writes.get(&page_id).map(Vec::as_slice).unwrap_or(&[]);
        match payload_transaction_id(&page.data) {
            Some(txn_id) => assert!(
                page_writes.iter().any(|r| r.transaction_id == txn_id
                    && matches!(r.operation, Operation::Insert | Operation::Update)),
                "page {} holds bytes of txn {} which never committed a write to it",
                page_id,
                txn_id
            ),
            None => {
                assert!(page.is_zeroed());
                assert!(
                    page_writes.is_empty()
                        || page_writes.iter().any(|r| r.operation == Operation::Delete)
                );
            }
        }
    }
}

#[test]
fn test_single_worker_last_write_wins() {
    let temp = TempDir::new().unwrap();
    let mut config = scenario_config(&temp);
    config.transaction_workers = 1;
    config.transaction_delay = Duration::ZERO;
    let engine = Arc::new(Engine::open(config).unwrap());

    Workload::spawn(Arc::clone(&engine), Some(150))
        .unwrap()
        .join();
    engine.close().unwrap();

    let (records, _) = WalRecovery::recover(&engine.wal_path()).unwrap();
    let writes = committed_writes(&records);

    for page_id in 0..10 {
        let page = engine.store().page(page_id).unwrap();
        match writes.get(&page_id).and_then(|w| w.last()) {
            Some(last) if last.operation == Operation::Delete => assert!(page.is_zeroed()),
            Some(last) => {
                assert_eq!(payload_transaction_id(&page.data), Some(last.transaction_id))
            }
            None => assert!(page.is_zeroed()),
        }
    }
}

#[test]
fn test_per_record_sync_workload() {
    let temp = TempDir::new().unwrap();
    let mut config = scenario_config(&temp);
    config.wal_sync_strategy = WalSyncStrategy::PerRecord;
    let engine = Arc::new(Engine::open(config).unwrap());

    Workload::spawn(Arc::clone(&engine), Some(40))
        .unwrap()
        .join();
    engine.close().unwrap();

    let metrics = engine.snapshot_metrics();
    assert_eq!(metrics.wal_records_written, 80);
    assert_eq!(metrics.wal_syncs, 80);
    assert_eq!(log_lines(&engine.wal_path()).len(), 80);
}

#[test]
fn test_shutdown_stops_unbounded_workload() {
    let temp = TempDir::new().unwrap();
    let mut config = scenario_config(&temp);
    config.transaction_workers = 2;
    config.reader_workers = 2;
    config.checkpoint_interval = Duration::from_millis(20);
    let engine = Arc::new(Engine::open(config).unwrap());

    let workload = Workload::spawn(Arc::clone(&engine), None).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        let metrics = engine.snapshot_metrics();
        metrics.transactions >= 20 && metrics.checkpoints >= 1
    }));

    engine.request_shutdown();
    let summary = workload.join();
    engine.close().unwrap();

    let metrics = engine.snapshot_metrics();
    assert!(summary.attempted >= 20);
    assert_eq!(metrics.transactions + metrics.errors, summary.attempted);
    assert_eq!(
        log_lines(&engine.wal_path()).len() as u64,
        2 * metrics.transactions + metrics.errors
    );
    assert!(metrics.reads > 0);
    assert!(metrics.cache_hits + metrics.cache_misses > 0);
    assert!(!log_lines(engine.checkpoint_log_path()).is_empty());

    let result = WalRecovery::verify(&engine.wal_path()).unwrap();
    assert_eq!(result.committed_transactions, metrics.transactions);
    assert!(result.ordering_violations.is_empty());
}

// =============================================================================
// Torn Page Scenario
// =============================================================================

#[test]
fn test_engine_writers_never_tear_page_seven() {
    let temp = TempDir::new().unwrap();
    let mut config = scenario_config(&temp);
    config.checkpoint_interval = Duration::from_millis(5);
    let engine = Arc::new(Engine::open(config).unwrap());

    let page_a = vec![b'A'; TEST_PAGE_SIZE];
    let page_b = vec![b'B'; TEST_PAGE_SIZE];
    engine.write_page(7, &page_a).unwrap();

    let writers: Vec<_> = [page_a.clone(), page_b.clone()]
        .into_iter()
        .map(|page| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..1000 {
                    engine.write_page(7, &page).unwrap();
                }
            })
        })
        .collect();

    let mut reads = 0;
    while writers.iter().any(|w| !w.is_finished()) || reads == 0 {
        let bytes = engine.read_page(7).unwrap();
        assert!(bytes.as_ref() == page_a.as_slice() || bytes.as_ref() == page_b.as_slice());
        reads += 1;
    }
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(engine.snapshot_metrics().errors, 0);
    engine.close().unwrap();
}
