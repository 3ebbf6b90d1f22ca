//! Transactions
//!
//! A transaction touches exactly one page. It is never persisted as an
//! object: only its two WAL records are.

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::page::PageId;
use crate::wal::{unix_millis, Operation, WalRecord};

/// Marker that starts every generated payload: `txn=<id>;`
const PAYLOAD_PREFIX: &[u8] = b"txn=";

/// A single unit of work
#[derive(Debug, Clone)]
pub struct Transaction {
    pub transaction_id: u64,
    pub thread_id: u32,
    pub operation: Operation,
    pub page_id: PageId,

    /// Bytes written by INSERT/UPDATE; empty for SELECT and DELETE
    pub payload: Bytes,

    /// Unix millis at creation
    pub timestamp: u64,

    /// LSN of the pre-operation record
    pub lsn: u64,

    committed: bool,
}

impl Transaction {
    pub fn new(
        transaction_id: u64,
        thread_id: u32,
        operation: Operation,
        page_id: PageId,
        payload: impl Into<Bytes>,
        lsn: u64,
    ) -> Self {
        Self {
            transaction_id,
            thread_id,
            operation,
            page_id,
            payload: payload.into(),
            timestamp: unix_millis(),
            lsn,
            committed: false,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Flip to committed; happens exactly once
    pub(crate) fn commit(&mut self) {
        debug_assert!(!self.committed, "transaction {} committed twice", self.transaction_id);
        self.committed = true;
    }

    /// WAL record for the current state, stamped with `lsn`
    pub fn log_record(&self, lsn: u64) -> WalRecord {
        WalRecord {
            transaction_id: self.transaction_id,
            lsn,
            thread_id: self.thread_id,
            operation: self.operation,
            page_id: self.page_id,
            size: self.payload.len(),
            timestamp: unix_millis(),
            committed: self.committed,
        }
    }
}

/// Extract the transaction id encoded at the start of a generated payload
///
/// "txn=42;..." → Some(42)
pub fn payload_transaction_id(data: &[u8]) -> Option<u64> {
    let rest = data.strip_prefix(PAYLOAD_PREFIX)?;
    let end = rest.iter().position(|&b| b == b';')?;
    std::str::from_utf8(&rest[..end]).ok()?.parse().ok()
}

/// Produces random transactions
///
/// Operations and page ids are uniform. Write payloads start with
/// `txn=<id>;` followed by alphanumeric filler up to `payload_size`.
pub struct TransactionGenerator {
    rng: StdRng,
    page_count: u32,
    payload_size: usize,
}

impl TransactionGenerator {
    /// Seeded generators are reproducible; unseeded ones use OS entropy
    pub fn new(seed: Option<u64>, page_count: u32, payload_size: usize) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            page_count: page_count.max(1),
            payload_size,
        }
    }

    pub fn next_operation(&mut self) -> Operation {
        Operation::ALL[self.rng.gen_range(0..Operation::ALL.len())]
    }

    pub fn next_page(&mut self) -> PageId {
        self.rng.gen_range(0..self.page_count)
    }

    /// Payload for `operation`, tagged with the transaction id
    pub fn payload(&mut self, transaction_id: u64, operation: Operation) -> Bytes {
        match operation {
            Operation::Select | Operation::Delete => Bytes::new(),
            Operation::Insert | Operation::Update => {
                let mut payload = format!("txn={};", transaction_id).into_bytes();
                let filler = self.payload_size.saturating_sub(payload.len());
                payload.extend((&mut self.rng).sample_iter(&Alphanumeric).take(filler));
                Bytes::from(payload)
            }
        }
    }

    /// Build the next transaction with the given identity
    pub fn generate(&mut self, transaction_id: u64, thread_id: u32, lsn: u64) -> Transaction {
        let operation = self.next_operation();
        let page_id = self.next_page();
        let payload = self.payload(transaction_id, operation);
        Transaction::new(transaction_id, thread_id, operation, page_id, payload, lsn)
    }
}
