//! Metrics Module
//!
//! Counters consumed by the reporting layer. Components receive an
//! `Arc<dyn Metrics>` rather than touching process-wide statics, so tests can
//! inject their own collector.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Every counter the store maintains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Transactions,
    Reads,
    Writes,
    CacheHits,
    CacheMisses,
    Checkpoints,
    Errors,
    WalRecordsWritten,
    WalBatches,
    WalSyncs,
}

impl Counter {
    pub const COUNT: usize = 10;

    pub const ALL: [Counter; Self::COUNT] = [
        Counter::Transactions,
        Counter::Reads,
        Counter::Writes,
        Counter::CacheHits,
        Counter::CacheMisses,
        Counter::Checkpoints,
        Counter::Errors,
        Counter::WalRecordsWritten,
        Counter::WalBatches,
        Counter::WalSyncs,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Collector interface with atomic increment semantics
pub trait Metrics: Send + Sync {
    /// Add `n` to a counter
    fn add(&self, counter: Counter, n: u64);

    /// Point-in-time copy of every counter
    fn snapshot(&self) -> MetricsSnapshot;

    fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }
}

/// Default collector: one relaxed atomic per counter
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    counters: [AtomicU64; Counter::COUNT],
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }
}

impl Metrics for AtomicMetrics {
    fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_fn(|c| self.get(c))
    }
}

/// Copy of all counters at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transactions: u64,
    pub reads: u64,
    pub writes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub checkpoints: u64,
    pub errors: u64,
    pub wal_records_written: u64,
    pub wal_batches: u64,
    pub wal_syncs: u64,
}

impl MetricsSnapshot {
    /// Build a snapshot by reading each counter through `read`
    pub fn from_fn(mut read: impl FnMut(Counter) -> u64) -> Self {
        Self {
            transactions: read(Counter::Transactions),
            reads: read(Counter::Reads),
            writes: read(Counter::Writes),
            cache_hits: read(Counter::CacheHits),
            cache_misses: read(Counter::CacheMisses),
            checkpoints: read(Counter::Checkpoints),
            errors: read(Counter::Errors),
            wal_records_written: read(Counter::WalRecordsWritten),
            wal_batches: read(Counter::WalBatches),
            wal_syncs: read(Counter::WalSyncs),
        }
    }

    /// Fraction of cache lookups that hit, or 0.0 before any lookup
    pub fn cache_hit_ratio(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "txns={} reads={} writes={} cache_hits={} cache_misses={} hit_ratio={:.2} \
             checkpoints={} errors={} wal_records={} wal_batches={} wal_syncs={}",
            self.transactions,
            self.reads,
            self.writes,
            self.cache_hits,
            self.cache_misses,
            self.cache_hit_ratio(),
            self.checkpoints,
            self.errors,
            self.wal_records_written,
            self.wal_batches,
            self.wal_syncs,
        )
    }
}
