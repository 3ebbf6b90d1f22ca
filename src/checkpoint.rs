//! Checkpoint Module
//!
//! Periodically persists every dirty or cached page and records an LSN
//! watermark in the checkpoint log.
//!
//! ## Cycle
//! ```text
//! Idle → Collecting(dirty set) → Flushing(pages) → Logging(record) → Idle
//! ```
//!
//! - The checkpoint lock (which also owns the checkpoint log) lets only one
//!   cycle run at a time. It is independent of the page store lock; each page
//!   flush holds the store lock only while that one page is rewritten.
//! - The dirty set is a point-in-time snapshot. Pages dirtied after it are
//!   picked up by the next cycle; the WAL stays the source of truth.
//! - A page that fails to flush stays dirty and the cycle writes no record.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Result, StoreError};
use crate::event_log::EventLog;
use crate::metrics::{Counter, Metrics};
use crate::page::{PageId, PageStore};
use crate::shutdown::ShutdownSignal;
use crate::wal::{unix_millis, LsnAllocator};

/// Where a checkpoint cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CheckpointPhase {
    Idle = 0,
    Collecting = 1,
    Flushing = 2,
    Logging = 3,
}

impl CheckpointPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CheckpointPhase::Collecting,
            2 => CheckpointPhase::Flushing,
            3 => CheckpointPhase::Logging,
            _ => CheckpointPhase::Idle,
        }
    }
}

/// One line of the checkpoint log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Unix millis when the record was written
    pub timestamp: u64,
    pub thread_id: u32,
    pub dirty_page_count: usize,
    pub lsn_watermark: u64,
}

impl fmt::Display for CheckpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CHECKPOINT|TS:{}|THREAD:{}|DIRTY:{}|LSN:{}",
            self.timestamp, self.thread_id, self.dirty_page_count, self.lsn_watermark
        )
    }
}

impl FromStr for CheckpointRecord {
    type Err = StoreError;

    fn from_str(line: &str) -> Result<Self> {
        let invalid = || StoreError::WalCorruption(format!("Invalid checkpoint line: {:?}", line));

        let mut fields = line.trim_end().split('|');
        if fields.next() != Some("CHECKPOINT") {
            return Err(invalid());
        }
        let mut value = |name: &str| -> Result<u64> {
            fields
                .next()
                .and_then(|f| f.strip_prefix(name))
                .and_then(|v| v.parse().ok())
                .ok_or_else(&invalid)
        };

        Ok(Self {
            timestamp: value("TS:")?,
            thread_id: value("THREAD:")? as u32,
            dirty_page_count: value("DIRTY:")? as usize,
            lsn_watermark: value("LSN:")?,
        })
    }
}

/// Outcome of one checkpoint cycle
#[derive(Debug, Clone)]
pub struct CheckpointReport {
    /// None when some page failed to flush (nothing was logged)
    pub record: Option<CheckpointRecord>,
    pub pages_flushed: usize,
    pub pages_failed: Vec<PageId>,
    pub duration: Duration,
}

impl CheckpointReport {
    pub fn is_complete(&self) -> bool {
        self.record.is_some()
    }
}

/// Append-only checkpoint log, owned by the checkpoint lock
struct CheckpointLog {
    file: BufWriter<File>,
}

impl CheckpointLog {
    fn append(&mut self, record: &CheckpointRecord) -> Result<()> {
        writeln!(self.file, "{}", record)?;
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(())
    }
}

/// Resets the phase to Idle however the cycle ends
struct PhaseGuard<'a>(&'a AtomicU8);

impl PhaseGuard<'_> {
    fn set(&self, phase: CheckpointPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.set(CheckpointPhase::Idle);
    }
}

/// Runs checkpoint cycles against the page store
pub struct CheckpointCoordinator {
    store: Arc<PageStore>,
    lsn: Arc<LsnAllocator>,

    /// Checkpoint lock; distinct from the page store lock
    log: Mutex<CheckpointLog>,
    log_path: PathBuf,

    phase: AtomicU8,
    lock_timeout: Option<Duration>,
    flush_threads: usize,

    metrics: Arc<dyn Metrics>,
    events: Arc<EventLog>,
}

impl CheckpointCoordinator {
    /// Open or create the checkpoint log
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        log_path: &Path,
        store: Arc<PageStore>,
        lsn: Arc<LsnAllocator>,
        lock_timeout: Option<Duration>,
        flush_threads: usize,
        metrics: Arc<dyn Metrics>,
        events: Arc<EventLog>,
    ) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(log_path)?;

        Ok(Self {
            store,
            lsn,
            log: Mutex::new(CheckpointLog {
                file: BufWriter::new(file),
            }),
            log_path: log_path.to_path_buf(),
            phase: AtomicU8::new(CheckpointPhase::Idle as u8),
            lock_timeout,
            flush_threads: flush_threads.max(1),
            metrics,
            events,
        })
    }

    /// Run one full checkpoint cycle
    ///
    /// Steps:
    /// 1. Take the checkpoint lock (bounded by `lock_timeout` if set)
    /// 2. Collecting: snapshot dirty and cached page ids
    /// 3. Flushing: durably rewrite each page, clearing its dirty flag
    /// 4. Logging: append a record with the current LSN watermark
    pub fn run_cycle(&self, thread_id: u32) -> Result<CheckpointReport> {
        let start = Instant::now();
        let mut log = self.lock_log()?;
        let phase = PhaseGuard(&self.phase);

        phase.set(CheckpointPhase::Collecting);
        let (page_ids, dirty_page_count) = self.collect()?;

        phase.set(CheckpointPhase::Flushing);
        let mut pages_flushed = 0;
        let mut pages_failed = Vec::new();
        for (page_id, outcome) in self.flush_pages(&page_ids) {
            match outcome {
                Ok(()) => pages_flushed += 1,
                Err(e) => {
                    self.metrics.incr(Counter::Errors);
                    tracing::warn!("Checkpoint flush of page {} failed: {}", page_id, e);
                    pages_failed.push(page_id);
                }
            }
        }
        pages_failed.sort_unstable();

        if !pages_failed.is_empty() {
            self.events.record(
                "checkpoint",
                format!(
                    "incomplete: {} flushed, {} failed",
                    pages_flushed,
                    pages_failed.len()
                ),
            );
            return Ok(CheckpointReport {
                record: None,
                pages_flushed,
                pages_failed,
                duration: start.elapsed(),
            });
        }

        phase.set(CheckpointPhase::Logging);
        let record = CheckpointRecord {
            timestamp: unix_millis(),
            thread_id,
            dirty_page_count,
            lsn_watermark: self.lsn.current(),
        };
        log.append(&record)?;
        drop(phase);
        drop(log);

        self.metrics.incr(Counter::Checkpoints);
        let duration = start.elapsed();
        tracing::debug!(
            "Checkpoint by thread {}: {} pages, lsn {}, {:?}",
            thread_id,
            pages_flushed,
            record.lsn_watermark,
            duration
        );
        self.events.record(
            "checkpoint",
            format!(
                "thread={} pages={} lsn={} took={}us",
                thread_id,
                pages_flushed,
                record.lsn_watermark,
                duration.as_micros()
            ),
        );

        Ok(CheckpointReport {
            record: Some(record),
            pages_flushed,
            pages_failed,
            duration,
        })
    }

    /// Start `count` checkpoint workers, each cycling every `interval`
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        interval: Duration,
        shutdown: &Arc<ShutdownSignal>,
    ) -> Result<Vec<JoinHandle<()>>> {
        (0..count)
            .map(|worker_id| {
                let coordinator = Arc::clone(self);
                let shutdown = Arc::clone(shutdown);
                thread::Builder::new()
                    .name(format!("checkpoint-{}", worker_id))
                    .spawn(move || coordinator.run_loop(worker_id as u32, interval, &shutdown))
                    .map_err(StoreError::from)
            })
            .collect()
    }

    /// Cycle until shutdown; failures are counted, never fatal
    pub fn run_loop(&self, worker_id: u32, interval: Duration, shutdown: &ShutdownSignal) {
        tracing::debug!("Checkpoint worker {} started", worker_id);

        while !shutdown.wait_timeout(interval) {
            match self.run_cycle(worker_id) {
                Ok(report) if !report.is_complete() => {
                    tracing::warn!(
                        "Checkpoint incomplete, {} pages stay dirty",
                        report.pages_failed.len()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    self.metrics.incr(Counter::Errors);
                    tracing::warn!("Checkpoint cycle failed: {}", e);
                    self.events.record("checkpoint", format!("cycle failed: {}", e));
                }
            }
        }

        tracing::debug!("Checkpoint worker {} stopped", worker_id);
    }

    pub fn phase(&self) -> CheckpointPhase {
        CheckpointPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn lock_log(&self) -> Result<MutexGuard<'_, CheckpointLog>> {
        match self.lock_timeout {
            Some(timeout) => self
                .log
                .try_lock_for(timeout)
                .ok_or(StoreError::LockTimeout("checkpoint")),
            None => Ok(self.log.lock()),
        }
    }

    /// Dirty pages plus cached pages, deduplicated, in id order
    /// Pages to flush (dirty or cached) and how many of them were dirty
    fn collect(&self) -> Result<(Vec<PageId>, usize)> {
        let mut page_ids = self.store.dirty_pages()?;
        let dirty = page_ids.len();
        page_ids.extend(self.store.cache().page_ids());
        page_ids.sort_unstable();
        page_ids.dedup();
        Ok((page_ids, dirty))
    }

    fn flush_pages(&self, page_ids: &[PageId]) -> Vec<(PageId, Result<()>)> {
        if self.flush_threads <= 1 || page_ids.len() <= 1 {
            return page_ids
                .iter()
                .map(|&id| (id, self.store.flush_page(id).map(|_| ())))
                .collect();
        }

        let chunk_size = (page_ids.len() + self.flush_threads - 1) / self.flush_threads;
        let store = &self.store;
        crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = page_ids
                .chunks(chunk_size)
                .map(|chunk| {
                    let handle = scope.spawn(move |_| {
                        chunk
                            .iter()
                            .map(|&id| (id, store.flush_page(id).map(|_| ())))
                            .collect::<Vec<_>>()
                    });
                    (chunk, handle)
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|(chunk, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        chunk.iter().map(|&id| (id, Err(flush_panicked()))).collect()
                    })
                })
                .collect()
        })
        .unwrap_or_else(|_| page_ids.iter().map(|&id| (id, Err(flush_panicked()))).collect())
    }
}

fn flush_panicked() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "checkpoint flush thread panicked",
    ))
}
