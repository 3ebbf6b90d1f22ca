//! walstore Benchmark Driver
//!
//! Runs a synthetic transaction workload against a store and reports its
//! counters once per second.

use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use walstore::shutdown::ShutdownSignal;
use walstore::{CachePolicy, Config, Engine, WalSyncStrategy, Workload};

/// walstore workload driver
#[derive(Parser, Debug)]
#[command(name = "walstore-bench")]
#[command(about = "Drive synthetic transactions through a WAL-backed page store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./walstore_data")]
    data_dir: String,

    /// Page size in bytes
    #[arg(long, default_value = "8192")]
    page_size: usize,

    /// Number of pages
    #[arg(short, long, default_value = "10")]
    pages: u32,

    /// Size of generated payloads in bytes
    #[arg(long, default_value = "256")]
    payload_size: usize,

    /// Page cache capacity (0 disables the cache)
    #[arg(short, long, default_value = "64")]
    cache: usize,

    /// Stop caching once full instead of evicting LRU pages
    #[arg(long)]
    no_eviction: bool,

    /// Records buffered before the WAL writer is woken
    #[arg(short, long, default_value = "32")]
    batch: usize,

    /// WAL writer polling interval in milliseconds
    #[arg(long, default_value = "10")]
    wal_flush_ms: u64,

    /// fsync after every WAL record instead of once per batch
    #[arg(long)]
    sync_per_record: bool,

    /// Checkpoint interval in milliseconds
    #[arg(long, default_value = "1000")]
    checkpoint_ms: u64,

    /// Checkpoint worker threads
    #[arg(long, default_value = "1")]
    checkpoint_workers: usize,

    /// Threads flushing pages within one checkpoint
    #[arg(long, default_value = "1")]
    flush_threads: usize,

    /// Pause between transactions of one worker, in milliseconds
    #[arg(long, default_value = "1")]
    delay_ms: u64,

    /// Transaction workers
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Dedicated reader workers
    #[arg(short, long, default_value = "0")]
    readers: usize,

    /// Seed for reproducible workloads
    #[arg(long)]
    seed: Option<u64>,

    /// Bound every lock wait, in milliseconds
    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    /// Total transactions to run
    #[arg(short, long)]
    transactions: Option<u64>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,
}

impl Args {
    fn config(&self) -> Config {
        let mut builder = Config::builder()
            .data_dir(&self.data_dir)
            .page_size(self.page_size)
            .page_count(self.pages)
            .payload_size(self.payload_size)
            .cache_capacity(self.cache)
            .cache_policy(if self.no_eviction {
                CachePolicy::NoEviction
            } else {
                CachePolicy::Lru
            })
            .wal_batch_size(self.batch)
            .wal_flush_interval(Duration::from_millis(self.wal_flush_ms))
            .wal_sync_strategy(if self.sync_per_record {
                WalSyncStrategy::PerRecord
            } else {
                WalSyncStrategy::PerBatch
            })
            .checkpoint_interval(Duration::from_millis(self.checkpoint_ms))
            .checkpoint_workers(self.checkpoint_workers)
            .checkpoint_flush_threads(self.flush_threads)
            .transaction_delay(Duration::from_millis(self.delay_ms))
            .transaction_workers(self.workers)
            .reader_workers(self.readers);

        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }
        if let Some(ms) = self.lock_timeout_ms {
            builder = builder.lock_timeout(Duration::from_millis(ms));
        }
        builder.build()
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,walstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("walstore-bench v{}", walstore::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);

    // Without a budget or a deadline the run would never end
    let budget = match (args.transactions, args.duration_secs) {
        (None, None) => Some(1000),
        (budget, _) => budget,
    };

    let engine = match Engine::open(args.config()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            process::exit(1);
        }
    };

    let started = Instant::now();
    let workload = match Workload::spawn(Arc::clone(&engine), budget) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("Failed to start workload: {}", e);
            engine.request_shutdown();
            process::exit(1);
        }
    };

    // Once-per-second reporter
    let reporting_done = Arc::new(ShutdownSignal::new());
    let reporter = {
        let engine = Arc::clone(&engine);
        let done = Arc::clone(&reporting_done);
        thread::spawn(move || {
            while !done.wait_timeout(Duration::from_secs(1)) {
                println!("[{:>6.1}s] {}", started.elapsed().as_secs_f64(), engine.snapshot_metrics());
            }
        })
    };

    if let Some(secs) = args.duration_secs {
        engine
            .shutdown_signal()
            .wait_timeout(Duration::from_secs(secs));
        engine.request_shutdown();
    }

    let summary = workload.join();
    reporting_done.request();
    let _ = reporter.join();

    if let Err(e) = engine.close() {
        tracing::error!("Close failed: {}", e);
    }

    let elapsed = started.elapsed();
    let metrics = engine.snapshot_metrics();
    println!();
    println!("Attempted:    {}", summary.attempted);
    println!("Elapsed:      {:.2}s", elapsed.as_secs_f64());
    println!(
        "Throughput:   {:.1} txn/s",
        metrics.transactions as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("Final:        {}", metrics);
}
