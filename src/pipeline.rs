//! Transaction Pipeline
//!
//! Drives transactions through the WAL buffer and the page store.
//!
//! ## Responsibilities
//! - Allocate transaction ids and LSNs
//! - Log the pre-record, apply the operation, log the post-record
//! - Count failures and abandon the transaction, never retry
//! - Run worker threads that generate load against an `Engine`
//!
//! ## Per-transaction sequence
//!
//! ```text
//! begin ──► pre-record (COMMITTED:NO) ──► apply ──► commit ──► post-record (COMMITTED:YES)
//!                                           │
//!                                           └── error: counted, no post-record
//! ```
//!
//! A transaction without a post-record in the log is incomplete. That is the
//! only crash-consistency marker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Result, StoreError};
use crate::event_log::EventLog;
use crate::metrics::{Counter, Metrics};
use crate::page::{PageId, PageStore};
use crate::transaction::{Transaction, TransactionGenerator};
use crate::wal::{LsnAllocator, Operation, WalBuffer};

/// Executes transactions against the store, logging each one twice
pub struct TransactionPipeline {
    store: Arc<PageStore>,
    wal: Arc<WalBuffer>,
    lsn: Arc<LsnAllocator>,
    next_transaction_id: AtomicU64,
    metrics: Arc<dyn Metrics>,
    events: Arc<EventLog>,
}

impl TransactionPipeline {
    pub fn new(
        store: Arc<PageStore>,
        wal: Arc<WalBuffer>,
        lsn: Arc<LsnAllocator>,
        first_transaction_id: u64,
        metrics: Arc<dyn Metrics>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            store,
            wal,
            lsn,
            next_transaction_id: AtomicU64::new(first_transaction_id),
            metrics,
            events,
        }
    }

    /// Create a transaction with a fresh id and pre-record LSN
    pub fn begin(
        &self,
        thread_id: u32,
        operation: Operation,
        page_id: PageId,
        payload: impl Into<Bytes>,
    ) -> Transaction {
        let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        Transaction::new(
            transaction_id,
            thread_id,
            operation,
            page_id,
            payload,
            self.lsn.allocate(),
        )
    }

    /// Create the generator's next transaction with a fresh id and LSN
    pub fn generate(&self, generator: &mut TransactionGenerator, thread_id: u32) -> Transaction {
        let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        generator.generate(transaction_id, thread_id, self.lsn.allocate())
    }

    /// Run one transaction to completion
    ///
    /// Steps:
    /// 1. Log the pre-record with the transaction's LSN
    /// 2. SELECT reads through the cache; writes go to the store
    /// 3. Mark committed and log the post-record with a new, larger LSN
    /// 4. Count the transaction
    ///
    /// Any failure in step 2 is counted and returned; the post-record is
    /// never written for it.
    pub fn execute(&self, mut txn: Transaction) -> Result<Transaction> {
        self.wal.add_entry(txn.log_record(txn.lsn));

        if let Err(e) = self.apply(&txn) {
            self.metrics.incr(Counter::Errors);
            tracing::warn!(
                "Transaction {} ({} page {}) abandoned: {}",
                txn.transaction_id,
                txn.operation,
                txn.page_id,
                e
            );
            self.events.record(
                "txn",
                format!("txn={} op={} abandoned: {}", txn.transaction_id, txn.operation, e),
            );
            return Err(e);
        }

        txn.commit();
        self.wal.add_entry(txn.log_record(self.lsn.allocate()));
        self.metrics.incr(Counter::Transactions);

        tracing::trace!(
            "Transaction {} committed: {} page {}",
            txn.transaction_id,
            txn.operation,
            txn.page_id
        );
        Ok(txn)
    }

    fn apply(&self, txn: &Transaction) -> Result<()> {
        match txn.operation {
            Operation::Select => self.store.fetch_page(txn.page_id).map(|_| ()),
            Operation::Insert | Operation::Update | Operation::Delete => {
                self.store.write_page(txn.page_id, &txn.payload)
            }
        }
    }

    /// Id the next transaction will receive
    pub fn next_transaction_id(&self) -> u64 {
        self.next_transaction_id.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Workload
// =============================================================================

/// Load-generating worker threads running against an engine
///
/// Transaction workers generate and submit transactions until shutdown or
/// until the shared budget is spent. Reader workers issue cache-assisted
/// page reads until the transaction workers are done.
pub struct Workload {
    transaction_workers: Vec<JoinHandle<()>>,
    reader_workers: Vec<JoinHandle<()>>,
    readers_stop: Arc<AtomicBool>,
    attempted: Arc<AtomicU64>,
}

/// Outcome of a finished workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadSummary {
    /// Transactions handed to the pipeline, successful or not
    pub attempted: u64,
}

impl Workload {
    /// Start the workers configured on the engine
    ///
    /// `budget` caps the total number of transactions across all workers;
    /// None runs until shutdown is requested.
    pub fn spawn(engine: Arc<Engine>, budget: Option<u64>) -> Result<Self> {
        let config = engine.config().clone();
        let limit = budget;
        let budget = budget.map(|n| Arc::new(AtomicU64::new(n)));
        let attempted = Arc::new(AtomicU64::new(0));
        let readers_stop = Arc::new(AtomicBool::new(false));

        let mut transaction_workers = Vec::with_capacity(config.transaction_workers);
        let mut reader_workers = Vec::with_capacity(config.reader_workers);

        for worker_id in 0..config.transaction_workers {
            let thread_id = worker_id as u32;
            let engine = Arc::clone(&engine);
            let budget = budget.clone();
            let attempted = Arc::clone(&attempted);
            let generator = TransactionGenerator::new(
                worker_seed(&config, worker_id),
                config.page_count,
                config.payload_size,
            );

            let handle = thread::Builder::new()
                .name(format!("txn-worker-{}", worker_id))
                .spawn(move || {
                    transaction_worker(&engine, thread_id, generator, budget.as_deref(), &attempted)
                });
            track(&mut transaction_workers, handle, &readers_stop)?;
        }

        for worker_id in 0..config.reader_workers {
            let engine = Arc::clone(&engine);
            let stop = Arc::clone(&readers_stop);
            let seed = worker_seed(&config, config.transaction_workers + worker_id);

            let handle = thread::Builder::new()
                .name(format!("reader-{}", worker_id))
                .spawn(move || reader_worker(&engine, seed, &stop));
            track(&mut reader_workers, handle, &readers_stop)?;
        }

        tracing::info!(
            "Workload started: {} transaction workers, {} readers, budget {:?}",
            config.transaction_workers,
            config.reader_workers,
            limit
        );
        Ok(Self {
            transaction_workers,
            reader_workers,
            readers_stop,
            attempted,
        })
    }

    /// Transactions handed to the pipeline so far
    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::SeqCst)
    }

    /// Wait for the transaction workers, then stop and join the readers
    pub fn join(self) -> WorkloadSummary {
        for handle in self.transaction_workers {
            if handle.join().is_err() {
                tracing::error!("Transaction worker panicked");
            }
        }

        self.readers_stop.store(true, Ordering::SeqCst);
        for handle in self.reader_workers {
            if handle.join().is_err() {
                tracing::error!("Reader worker panicked");
            }
        }

        WorkloadSummary {
            attempted: self.attempted.load(Ordering::SeqCst),
        }
    }
}

/// Distinct, reproducible seed per worker when a base seed is set
fn worker_seed(config: &Config, worker_index: usize) -> Option<u64> {
    config.seed.map(|seed| seed.wrapping_add(worker_index as u64))
}

/// Keep a spawned worker; on spawn failure stop the readers and bail
fn track(
    handles: &mut Vec<JoinHandle<()>>,
    spawned: std::io::Result<JoinHandle<()>>,
    readers_stop: &AtomicBool,
) -> Result<()> {
    match spawned {
        Ok(handle) => {
            handles.push(handle);
            Ok(())
        }
        Err(e) => {
            readers_stop.store(true, Ordering::SeqCst);
            Err(StoreError::from(e))
        }
    }
}

/// Take one unit from the budget; false once it is spent
fn claim(budget: &AtomicU64) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

fn transaction_worker(
    engine: &Engine,
    thread_id: u32,
    mut generator: TransactionGenerator,
    budget: Option<&AtomicU64>,
    attempted: &AtomicU64,
) {
    let shutdown = engine.shutdown_signal();
    let delay = engine.config().transaction_delay;
    tracing::debug!("Transaction worker {} started", thread_id);

    while !shutdown.is_requested() {
        if let Some(budget) = budget {
            if !claim(budget) {
                break;
            }
        }

        attempted.fetch_add(1, Ordering::SeqCst);
        // Failures are already counted and logged by the pipeline
        let _ = engine.submit_with(&mut generator, thread_id);

        if !delay.is_zero() && shutdown.wait_timeout(delay) {
            break;
        }
    }

    tracing::debug!("Transaction worker {} stopped", thread_id);
}

fn reader_worker(engine: &Engine, seed: Option<u64>, stop: &AtomicBool) {
    let shutdown = engine.shutdown_signal();
    let delay = engine.config().transaction_delay;
    let page_count = engine.config().page_count;
    let mut generator = TransactionGenerator::new(seed, page_count, 0);

    while !shutdown.is_requested() && !stop.load(Ordering::SeqCst) {
        let page_id = generator.next_page();
        let _ = engine.read_page(page_id);

        if delay.is_zero() {
            thread::yield_now();
        } else if shutdown.wait_timeout(jitter(delay)) {
            break;
        }
    }
}

/// Randomize reader pacing so readers don't march in step
fn jitter(delay: Duration) -> Duration {
    delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
}
