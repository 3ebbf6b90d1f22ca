//! WAL writer, reader, recovery and background flusher tests

#[path = "../common/mod.rs"]
mod common;

mod reader_tests;

use walstore::wal::{Operation, WalRecord};

/// Record with the given identity; other fields fixed
pub fn record(transaction_id: u64, lsn: u64, committed: bool) -> WalRecord {
    WalRecord {
        transaction_id,
        lsn,
        thread_id: 0,
        operation: Operation::Update,
        page_id: (transaction_id % 10) as u32,
        size: 64,
        timestamp: 1_700_000_000_000,
        committed,
    }
}

/// Pre- and post-record for each transaction id, LSNs 1, 2, 3, ...
pub fn transaction_pairs(count: u64) -> Vec<WalRecord> {
    (1..=count)
        .flat_map(|id| [record(id, 2 * id - 1, false), record(id, 2 * id, true)])
        .collect()
}
