//! Configuration for walstore
//!
//! Centralized configuration with sensible defaults. The store only consumes
//! these values; parsing them from the command line is the binary's job.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Main configuration for a walstore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log          (transaction log)
    ///     ├── checkpoint.log   (checkpoint markers)
    ///     ├── events.log       (diagnostic event log)
    ///     └── pages/           (page_<id>.dbp files)
    pub data_dir: PathBuf,

    /// Size of every page in bytes
    pub page_size: usize,

    /// Number of pages; valid ids are `0..page_count`
    pub page_count: u32,

    /// Size of generated transaction payloads (must fit in a page)
    pub payload_size: usize,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Maximum number of cached pages (0 disables the cache)
    pub cache_capacity: usize,

    /// What happens once the cache is full
    pub cache_policy: CachePolicy,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Buffered record count that wakes the writer early
    pub wal_batch_size: usize,

    /// Polling interval of the WAL writer
    pub wal_flush_interval: Duration,

    /// Sync strategy: how often to fsync the log
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // Checkpoint Configuration
    // -------------------------------------------------------------------------
    /// Interval between checkpoint cycles
    pub checkpoint_interval: Duration,

    /// Number of checkpoint worker threads
    pub checkpoint_workers: usize,

    /// Threads used to flush pages within a single checkpoint
    pub checkpoint_flush_threads: usize,

    // -------------------------------------------------------------------------
    // Workload Configuration
    // -------------------------------------------------------------------------
    /// Pause between two transactions of the same worker
    pub transaction_delay: Duration,

    /// Number of transaction workers
    pub transaction_workers: usize,

    /// Number of dedicated reader workers
    pub reader_workers: usize,

    /// Seed for the transaction generators (random when unset)
    pub seed: Option<u64>,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Bounded wait for page-store and checkpoint locks (None blocks)
    pub lock_timeout: Option<Duration>,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// flush + fsync after every record (the slow baseline)
    PerRecord,

    /// one write + fsync per drained batch
    PerBatch,
}

/// Page cache admission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Evict the least recently used page to make room
    Lru,

    /// Refuse new pages once full; they are served from the store
    NoEviction,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./walstore_data"),
            page_size: 8192,
            page_count: 10,
            payload_size: 256,
            cache_capacity: 64,
            cache_policy: CachePolicy::Lru,
            wal_batch_size: 32,
            wal_flush_interval: Duration::from_millis(10),
            wal_sync_strategy: WalSyncStrategy::PerBatch,
            checkpoint_interval: Duration::from_secs(1),
            checkpoint_workers: 1,
            checkpoint_flush_threads: 1,
            transaction_delay: Duration::from_millis(1),
            transaction_workers: 4,
            reader_workers: 0,
            seed: None,
            lock_timeout: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(StoreError::Config("page_size must be non-zero".into()));
        }
        if self.page_count == 0 {
            return Err(StoreError::Config("page_count must be non-zero".into()));
        }
        if self.payload_size > self.page_size {
            return Err(StoreError::Config(format!(
                "payload_size {} exceeds page_size {}",
                self.payload_size, self.page_size
            )));
        }
        if self.wal_batch_size == 0 {
            return Err(StoreError::Config("wal_batch_size must be non-zero".into()));
        }
        if self.transaction_workers == 0 {
            return Err(StoreError::Config(
                "at least one transaction worker is required".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the page size (in bytes)
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the number of pages
    pub fn page_count(mut self, count: u32) -> Self {
        self.config.page_count = count;
        self
    }

    /// Set the generated payload size (in bytes)
    pub fn payload_size(mut self, size: usize) -> Self {
        self.config.payload_size = size;
        self
    }

    /// Set the page cache capacity (in pages)
    pub fn cache_capacity(mut self, pages: usize) -> Self {
        self.config.cache_capacity = pages;
        self
    }

    /// Set the cache admission policy
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.config.cache_policy = policy;
        self
    }

    /// Set the WAL batch size
    pub fn wal_batch_size(mut self, records: usize) -> Self {
        self.config.wal_batch_size = records;
        self
    }

    /// Set the WAL writer polling interval
    pub fn wal_flush_interval(mut self, interval: Duration) -> Self {
        self.config.wal_flush_interval = interval;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the checkpoint interval
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.config.checkpoint_interval = interval;
        self
    }

    /// Set the number of checkpoint workers
    pub fn checkpoint_workers(mut self, count: usize) -> Self {
        self.config.checkpoint_workers = count;
        self
    }

    /// Set the number of threads flushing pages inside one checkpoint
    pub fn checkpoint_flush_threads(mut self, count: usize) -> Self {
        self.config.checkpoint_flush_threads = count;
        self
    }

    /// Set the delay between transactions
    pub fn transaction_delay(mut self, delay: Duration) -> Self {
        self.config.transaction_delay = delay;
        self
    }

    /// Set the number of transaction workers
    pub fn transaction_workers(mut self, count: usize) -> Self {
        self.config.transaction_workers = count;
        self
    }

    /// Set the number of dedicated reader workers
    pub fn reader_workers(mut self, count: usize) -> Self {
        self.config.reader_workers = count;
        self
    }

    /// Seed the transaction generators
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Bound lock waits; acquisition fails with `LockTimeout` afterwards
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
