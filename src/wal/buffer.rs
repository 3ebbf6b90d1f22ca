//! WAL Buffer
//!
//! In-memory, FIFO batch of pending records shared by all producers.
//!
//! The mutex is held only for the push or the swap, never across disk I/O,
//! so producers are never blocked by the writer's fsync.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::WalRecord;

/// Pending records waiting for the background writer
pub struct WalBuffer {
    records: Mutex<Vec<WalRecord>>,

    /// Record count at which the writer is woken early
    batch_size: usize,

    /// Capacity-1 wakeup for the writer; a pending wakeup absorbs the rest
    flush_tx: Sender<()>,
    flush_rx: Receiver<()>,
}

impl WalBuffer {
    pub fn new(batch_size: usize) -> Self {
        let (flush_tx, flush_rx) = channel::bounded(1);
        Self {
            records: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size: batch_size.max(1),
            flush_tx,
            flush_rx,
        }
    }

    /// Append a record; never blocks on I/O
    ///
    /// Once this returns the record is either buffered here or, after a
    /// drain, in the writer's hands until it is durably written.
    pub fn add_entry(&self, record: WalRecord) {
        let full = {
            let mut records = self.records.lock();
            records.push(record);
            records.len() >= self.batch_size
        };

        if full {
            let _ = self.flush_tx.try_send(());
        }
    }

    /// True once the buffered count reaches the batch size
    pub fn should_flush(&self) -> bool {
        self.records.lock().len() >= self.batch_size
    }

    /// Swap out the buffer and return its previous contents in FIFO order
    pub fn flush_and_clear(&self) -> Vec<WalRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Put a batch that failed to write back in front of newer records
    pub fn requeue_front(&self, batch: Vec<WalRecord>) {
        if batch.is_empty() {
            return;
        }
        let mut records = self.records.lock();
        records.splice(0..0, batch);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Ready whenever a full batch is waiting
    pub fn flush_requests(&self) -> &Receiver<()> {
        &self.flush_rx
    }
}
