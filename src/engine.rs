//! Engine Module
//!
//! Wires the page store, cache, WAL and checkpointing into one running
//! instance and exposes the transaction API.
//!
//! ## Responsibilities
//! - Lay out the data directory and scan the existing WAL on startup
//! - Start the WAL writer and checkpoint workers
//! - Route transactions and direct page access through one pipeline
//! - Shut down cooperatively, draining the WAL one last time
//!
//! ## Concurrency Model
//!
//! - **Page bytes**: one reader/writer lock inside `PageStore`
//!   - Many concurrent reads, one writer at a time
//! - **WAL**: producers push into `WalBuffer` under a short mutex; the
//!   single `wal-writer` thread does all log I/O
//! - **Checkpoints**: serialized by the coordinator's own lock, so scheduling
//!   never contends with transaction traffic
//!
//! Every background thread polls the shared `ShutdownSignal`; `close()` sets
//! it and joins them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::checkpoint::{CheckpointCoordinator, CheckpointReport};
use crate::config::Config;
use crate::error::Result;
use crate::event_log::EventLog;
use crate::metrics::{AtomicMetrics, Counter, Metrics, MetricsSnapshot};
use crate::page::{PageCache, PageId, PageStore};
use crate::pipeline::TransactionPipeline;
use crate::shutdown::ShutdownSignal;
use crate::transaction::{Transaction, TransactionGenerator};
use crate::wal::{
    LsnAllocator, Operation, RecoveryResult, WalBuffer, WalFlusher, WalRecovery, WalWriter,
};

/// A running store instance
pub struct Engine {
    config: Config,

    store: Arc<PageStore>,
    wal: Arc<WalBuffer>,
    lsn: Arc<LsnAllocator>,
    pipeline: TransactionPipeline,
    checkpoint: Arc<CheckpointCoordinator>,

    /// Generator behind `submit_transaction`; workers carry their own
    generator: Mutex<TransactionGenerator>,

    metrics: Arc<dyn Metrics>,
    events: Arc<EventLog>,
    shutdown: Arc<ShutdownSignal>,

    /// WAL writer and checkpoint workers; emptied by `close`
    services: Mutex<Vec<JoinHandle<()>>>,

    /// What the startup scan found in the existing log
    recovery: RecoveryResult,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const CHECKPOINT_FILENAME: &'static str = "checkpoint.log";
    const EVENT_LOG_FILENAME: &'static str = "events.log";
    const PAGE_DIR: &'static str = "pages";

    /// Open or create an engine with the given config
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_metrics(config, Arc::new(AtomicMetrics::new()))
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config {
            data_dir: path.to_path_buf(),
            ..Config::default()
        };
        Self::open(config)
    }

    /// Open with a caller-supplied metrics collector
    ///
    /// On startup:
    /// 1. Validate config and create the data directory
    /// 2. Scan the existing WAL; LSNs and transaction ids continue after it
    /// 3. Open the page store, formatting missing pages
    /// 4. Wire the WAL buffer, checkpoint coordinator and pipeline
    /// 5. Start the WAL writer and checkpoint workers
    pub fn open_with_metrics(config: Config, metrics: Arc<dyn Metrics>) -> Result<Self> {
        // Step 1: Validate and lay out the data directory
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let checkpoint_path = config.data_dir.join(Self::CHECKPOINT_FILENAME);
        let events = Arc::new(EventLog::open(
            &config.data_dir.join(Self::EVENT_LOG_FILENAME),
        )?);

        // Step 2: Scan the log left by a previous run
        let recovery = WalRecovery::verify(&wal_path)?;
        if recovery.records_read > 0 || recovery.records_corrupted > 0 {
            tracing::info!(
                "WAL scan: {} records, {} corrupted, {} incomplete transactions, last_lsn={}",
                recovery.records_read,
                recovery.records_corrupted,
                recovery.incomplete_transactions.len(),
                recovery.last_lsn
            );
            events.record(
                "engine",
                format!(
                    "wal scan records={} corrupted={} incomplete={} last_lsn={}",
                    recovery.records_read,
                    recovery.records_corrupted,
                    recovery.incomplete_transactions.len(),
                    recovery.last_lsn
                ),
            );
        }
        let lsn = Arc::new(LsnAllocator::new(recovery.last_lsn + 1));

        // Step 3: Page store and cache
        let cache = Arc::new(PageCache::new(
            config.cache_capacity,
            config.cache_policy,
            Arc::clone(&metrics),
        ));
        let store = Arc::new(PageStore::open(
            &config.data_dir.join(Self::PAGE_DIR),
            &config,
            cache,
            Arc::clone(&metrics),
        )?);

        // Step 4: WAL, checkpointing, pipeline
        let wal = Arc::new(WalBuffer::new(config.wal_batch_size));
        let writer = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        let checkpoint = Arc::new(CheckpointCoordinator::open(
            &checkpoint_path,
            Arc::clone(&store),
            Arc::clone(&lsn),
            config.lock_timeout,
            config.checkpoint_flush_threads,
            Arc::clone(&metrics),
            Arc::clone(&events),
        )?);
        let pipeline = TransactionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&wal),
            Arc::clone(&lsn),
            recovery.last_transaction_id + 1,
            Arc::clone(&metrics),
            Arc::clone(&events),
        );
        let generator = TransactionGenerator::new(
            config.seed,
            config.page_count,
            config.payload_size,
        );
        let shutdown = Arc::new(ShutdownSignal::new());

        let flusher = WalFlusher::new(
            writer,
            Arc::clone(&wal),
            Arc::clone(&lsn),
            Arc::clone(&shutdown),
            Arc::clone(&metrics),
            Arc::clone(&events),
            config.wal_flush_interval,
        );

        let engine = Self {
            config,
            store,
            wal,
            lsn,
            pipeline,
            checkpoint,
            generator: Mutex::new(generator),
            metrics,
            events,
            shutdown,
            services: Mutex::new(Vec::new()),
            recovery,
        };

        // Step 5: Background services; on failure Drop stops what started
        engine.services.lock().push(flusher.spawn()?);
        let workers = engine.checkpoint.spawn_workers(
            engine.config.checkpoint_workers,
            engine.config.checkpoint_interval,
            &engine.shutdown,
        )?;
        engine.services.lock().extend(workers);

        tracing::info!(
            "Engine opened at {}: {} pages of {} bytes, last lsn {}",
            engine.config.data_dir.display(),
            engine.config.page_count,
            engine.config.page_size,
            engine.lsn.current()
        );
        engine.events.record("engine", "opened");
        Ok(engine)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a transaction with a fresh id and LSN; run it with `execute`
    pub fn begin(
        &self,
        thread_id: u32,
        operation: Operation,
        page_id: PageId,
        payload: impl Into<Bytes>,
    ) -> Transaction {
        self.pipeline.begin(thread_id, operation, page_id, payload)
    }

    /// Log, apply and commit a transaction
    pub fn execute(&self, txn: Transaction) -> Result<Transaction> {
        self.pipeline.execute(txn)
    }

    /// Generate and execute one random transaction
    pub fn submit_transaction(&self, thread_id: u32) -> Result<Transaction> {
        let txn = {
            let mut generator = self.generator.lock();
            self.pipeline.generate(&mut generator, thread_id)
        };
        self.pipeline.execute(txn)
    }

    /// Generate from the caller's generator and execute
    pub fn submit_with(
        &self,
        generator: &mut TransactionGenerator,
        thread_id: u32,
    ) -> Result<Transaction> {
        let txn = self.pipeline.generate(generator, thread_id);
        self.pipeline.execute(txn)
    }

    // =========================================================================
    // Direct page access (not logged)
    // =========================================================================

    /// Cache-assisted page read
    pub fn read_page(&self, page_id: PageId) -> Result<Bytes> {
        self.store.fetch_page(page_id).map_err(|e| self.count_error(e))
    }

    /// Overwrite a page, zero-padded to the page size
    pub fn write_page(&self, page_id: PageId, payload: &[u8]) -> Result<()> {
        self.store
            .write_page(page_id, payload)
            .map_err(|e| self.count_error(e))
    }

    /// Run one checkpoint cycle on the calling thread
    pub fn checkpoint_now(&self, thread_id: u32) -> Result<CheckpointReport> {
        self.checkpoint
            .run_cycle(thread_id)
            .map_err(|e| self.count_error(e))
    }

    fn count_error<E: std::fmt::Display>(&self, e: E) -> E {
        self.metrics.incr(Counter::Errors);
        tracing::warn!("Engine operation failed: {}", e);
        e
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Ask every background loop and workload worker to stop
    pub fn request_shutdown(&self) {
        if !self.shutdown.is_requested() {
            tracing::info!("Shutdown requested");
            self.events.record("engine", "shutdown requested");
        }
        self.shutdown.request();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Stop background services and make every buffered record durable
    ///
    /// Safe to call more than once. Records added after the WAL writer
    /// exited are written here directly.
    pub fn close(&self) -> Result<()> {
        self.request_shutdown();

        let services: Vec<_> = self.services.lock().drain(..).collect();
        let stopped = services.len();
        for handle in services {
            if handle.join().is_err() {
                tracing::error!("Background service panicked during shutdown");
            }
        }

        let drained = self.drain_remaining()?;
        self.events.flush();

        if stopped > 0 {
            tracing::info!(
                "Engine closed: {} services stopped, {} late records drained",
                stopped,
                drained
            );
            self.events.record("engine", "closed");
            self.events.flush();
        }
        Ok(())
    }

    /// Write whatever is still buffered once the WAL writer is gone
    fn drain_remaining(&self) -> Result<usize> {
        if self.wal.is_empty() {
            return Ok(0);
        }

        let batch = self.wal.flush_and_clear();
        let mut writer = WalWriter::open(&self.wal_path(), self.config.wal_sync_strategy)?;
        match writer.write_batch(&batch) {
            Ok(syncs) => {
                if let Some(max_lsn) = batch.iter().map(|r| r.lsn).max() {
                    self.lsn.mark_durable(max_lsn);
                }
                self.metrics.add(Counter::WalRecordsWritten, batch.len() as u64);
                self.metrics.incr(Counter::WalBatches);
                self.metrics.add(Counter::WalSyncs, syncs);
                Ok(batch.len())
            }
            Err(e) => {
                self.wal.requeue_front(batch);
                Err(self.count_error(e))
            }
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn snapshot_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> &Arc<dyn Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        self.store.cache()
    }

    pub fn checkpoint(&self) -> &Arc<CheckpointCoordinator> {
        &self.checkpoint
    }

    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Result of the WAL scan done at open
    pub fn recovery(&self) -> &RecoveryResult {
        &self.recovery
    }

    /// Last LSN handed out
    pub fn current_lsn(&self) -> u64 {
        self.lsn.current()
    }

    /// Highest LSN known to be on disk
    pub fn durable_lsn(&self) -> u64 {
        self.lsn.durable()
    }

    /// Records waiting for the WAL writer
    pub fn pending_wal_records(&self) -> usize {
        self.wal.len()
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn wal_path(&self) -> PathBuf {
        self.config.data_dir.join(Self::WAL_FILENAME)
    }

    pub fn checkpoint_log_path(&self) -> &Path {
        self.checkpoint.log_path()
    }

    pub fn event_log_path(&self) -> &Path {
        self.events.path()
    }

    pub fn pages_dir(&self) -> &Path {
        self.store.pages_dir()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Engine close on drop failed: {}", e);
        }
    }
}
