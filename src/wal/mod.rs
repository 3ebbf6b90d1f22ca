//! Write-Ahead Log (WAL) Module
//!
//! Provides durability ordering through append-only logging.
//!
//! ## Responsibilities
//! - Log Sequence Numbers (LSN) from a single atomic counter
//! - In-memory batching so producers never wait on disk I/O
//! - One background writer appending whole batches with one fsync each
//! - Scanning the log to find transactions that never committed
//!
//! ## File Format
//! Newline-delimited text, two records per transaction:
//! ```text
//! TXN:7|LSN:13|THREAD:2|OP:UPDATE|PAGE:4|SIZE:256|TS:1718000000000|COMMITTED:NO
//! TXN:7|LSN:14|THREAD:2|OP:UPDATE|PAGE:4|SIZE:256|TS:1718000000001|COMMITTED:YES
//! ```

mod buffer;
mod reader;
mod record;
mod recovery;
mod writer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub use buffer::WalBuffer;
pub use reader::{WalIterator, WalReader};
pub use record::{Operation, WalRecord};
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::{LogSink, WalFlusher, WalWriter};

/// Hands out globally unique, strictly increasing LSNs
///
/// Also tracks the highest LSN known to be durable in the log file.
#[derive(Debug)]
pub struct LsnAllocator {
    next: AtomicU64,
    durable: AtomicU64,
}

impl LsnAllocator {
    /// Start handing out LSNs at `first` (must be at least 1)
    pub fn new(first: u64) -> Self {
        let first = first.max(1);
        Self {
            next: AtomicU64::new(first),
            durable: AtomicU64::new(first - 1),
        }
    }

    /// Allocate the next LSN
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Last LSN handed out (0 before the first allocation)
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst) - 1
    }

    /// Highest LSN written and synced to the log
    pub fn durable(&self) -> u64 {
        self.durable.load(Ordering::SeqCst)
    }

    pub fn mark_durable(&self, lsn: u64) {
        self.durable.fetch_max(lsn, Ordering::SeqCst);
    }
}

impl Default for LsnAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
