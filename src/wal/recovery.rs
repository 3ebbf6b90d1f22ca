//! WAL Recovery
//!
//! Scans the log after a crash or clean shutdown. A transaction is complete
//! only if its post-commit record (`COMMITTED:YES`) reached the log; a
//! pre-operation record without one marks an incomplete transaction.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{Result, StoreError};

use super::{WalReader, WalRecord};

/// Scans WAL files
pub struct WalRecovery;

/// Result of a scan
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Valid records read (duplicates excluded)
    pub records_read: u64,

    /// Malformed lines skipped
    pub records_corrupted: u64,

    /// Lines repeating an LSN already seen (retried batches)
    pub duplicate_records: u64,

    /// Transactions with a post-commit record
    pub committed_transactions: u64,

    /// Transactions logged but never committed, in id order
    pub incomplete_transactions: Vec<u64>,

    /// Transactions whose commit record precedes or undercuts the pre-record
    pub ordering_violations: Vec<u64>,

    /// Highest valid LSN (0 for an empty log)
    pub last_lsn: u64,

    /// Highest transaction id (0 for an empty log)
    pub last_transaction_id: u64,
}

#[derive(Default)]
struct TxnState {
    pre_lsn: Option<u64>,
    post_lsn: Option<u64>,
    misordered: bool,
}

impl WalRecovery {
    /// Read every valid record and summarize the log
    ///
    /// This will:
    /// 1. Skip malformed lines (counted as corrupted)
    /// 2. Drop repeated LSNs left by retried batches
    /// 3. Pair pre- and post-records per transaction
    /// 4. Return the valid records in file order
    ///
    /// A missing file is an empty log.
    pub fn recover(path: &Path) -> Result<(Vec<WalRecord>, RecoveryResult)> {
        let mut result = RecoveryResult::default();
        if !path.exists() {
            return Ok((Vec::new(), result));
        }

        let mut reader = WalReader::open(path)?;
        let mut records = Vec::new();
        let mut seen_lsns = HashSet::new();
        let mut transactions: BTreeMap<u64, TxnState> = BTreeMap::new();

        loop {
            let record = match reader.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(StoreError::WalCorruption(msg)) => {
                    tracing::warn!("Skipping WAL line {}: {}", reader.line_number(), msg);
                    result.records_corrupted += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !seen_lsns.insert(record.lsn) {
                result.duplicate_records += 1;
                continue;
            }

            let state = transactions.entry(record.transaction_id).or_default();
            if record.committed {
                // A commit must follow its pre-record, with a higher LSN
                match state.pre_lsn {
                    Some(pre) if pre < record.lsn => {}
                    _ => state.misordered = true,
                }
                state.post_lsn = Some(record.lsn);
            } else {
                if state.post_lsn.is_some() {
                    state.misordered = true;
                }
                state.pre_lsn = Some(record.lsn);
            }

            result.records_read += 1;
            result.last_lsn = result.last_lsn.max(record.lsn);
            result.last_transaction_id = result.last_transaction_id.max(record.transaction_id);
            records.push(record);
        }

        for (id, state) in &transactions {
            if state.misordered {
                result.ordering_violations.push(*id);
            }
            if state.post_lsn.is_some() {
                result.committed_transactions += 1;
            } else {
                result.incomplete_transactions.push(*id);
            }
        }

        Ok((records, result))
    }

    /// Summarize a WAL file without returning its records
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::recover(path).map(|(_, result)| result)
    }
}
