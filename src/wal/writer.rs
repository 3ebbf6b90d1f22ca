//! WAL Writer
//!
//! `WalWriter` appends records to the log file; `WalFlusher` is the single
//! background loop that drains the `WalBuffer` into it.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::select;

use crate::config::WalSyncStrategy;
use crate::error::{Result, StoreError};
use crate::event_log::EventLog;
use crate::metrics::{Counter, Metrics};
use crate::shutdown::ShutdownSignal;

use super::{LsnAllocator, WalBuffer, WalRecord};

/// Byte destination of the log
pub trait LogSink: Write + Send {
    /// Make everything written so far durable
    fn sync(&mut self) -> io::Result<()>;
}

impl LogSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Appends records to the WAL file
///
/// A batch is formatted into memory and handed to the sink in one write, so a
/// failed write leaves nothing half-buffered for the retry to duplicate.
pub struct WalWriter<S: LogSink = File> {
    path: PathBuf,
    sink: S,
    scratch: Vec<u8>,
    sync_strategy: WalSyncStrategy,
    records_written: u64,
    batches_written: u64,
    syncs: u64,
}

impl WalWriter {
    /// Open or create a WAL file in append mode
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::with_sink(path, file, sync_strategy))
    }
}

impl<S: LogSink> WalWriter<S> {
    /// Writer over any sink; `path` is only used for diagnostics
    pub fn with_sink(path: &Path, sink: S, sync_strategy: WalSyncStrategy) -> Self {
        Self {
            path: path.to_path_buf(),
            sink,
            scratch: Vec::new(),
            sync_strategy,
            records_written: 0,
            batches_written: 0,
            syncs: 0,
        }
    }

    /// Append a batch in order, syncing per the configured strategy
    ///
    /// Returns the number of fsyncs issued.
    pub fn write_batch(&mut self, records: &[WalRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut syncs = 0;
        match self.sync_strategy {
            WalSyncStrategy::PerBatch => {
                self.scratch.clear();
                for record in records {
                    writeln!(self.scratch, "{}", record)?;
                }
                self.sink.write_all(&self.scratch)?;
                self.sync()?;
                syncs += 1;
            }
            WalSyncStrategy::PerRecord => {
                for record in records {
                    self.scratch.clear();
                    writeln!(self.scratch, "{}", record)?;
                    self.sink.write_all(&self.scratch)?;
                    self.sync()?;
                    syncs += 1;
                }
            }
        }

        self.records_written += records.len() as u64;
        self.batches_written += 1;
        Ok(syncs)
    }

    /// Flush buffered lines and fsync the file
    pub fn sync(&mut self) -> Result<()> {
        self.sink.flush()?;
        self.sink.sync()?;
        self.syncs += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }

    pub fn sync_count(&self) -> u64 {
        self.syncs
    }
}

/// Background loop draining the buffer into the log
///
/// Wakes when a full batch is waiting, on every `interval` tick, or on
/// shutdown. Each wakeup drains whatever is buffered and writes it as one
/// batch. On shutdown it performs one last drain before exiting.
pub struct WalFlusher<S: LogSink = File> {
    writer: WalWriter<S>,
    buffer: Arc<WalBuffer>,
    lsn: Arc<LsnAllocator>,
    shutdown: Arc<ShutdownSignal>,
    metrics: Arc<dyn Metrics>,
    events: Arc<EventLog>,
    interval: Duration,
}

impl<S: LogSink + 'static> WalFlusher<S> {
    pub fn new(
        writer: WalWriter<S>,
        buffer: Arc<WalBuffer>,
        lsn: Arc<LsnAllocator>,
        shutdown: Arc<ShutdownSignal>,
        metrics: Arc<dyn Metrics>,
        events: Arc<EventLog>,
        interval: Duration,
    ) -> Self {
        Self {
            writer,
            buffer,
            lsn,
            shutdown,
            metrics,
            events,
            interval,
        }
    }

    /// Run the loop on its own thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("wal-writer".to_string())
            .spawn(move || self.run())
            .map_err(StoreError::from)
    }

    /// Loop until shutdown, then drain one final time
    pub fn run(mut self) {
        tracing::debug!("WAL writer started for {}", self.writer.path().display());

        while !self.shutdown.is_requested() {
            select! {
                recv(self.buffer.flush_requests()) -> _ => {}
                recv(self.shutdown.receiver()) -> _ => {}
                default(self.interval) => {}
            }

            if let Err(e) = self.drain() {
                self.metrics.incr(Counter::Errors);
                tracing::warn!("WAL batch write failed, will retry: {}", e);
                self.events.record("wal", format!("batch write failed: {}", e));
            }
        }

        match self.drain() {
            Ok(count) => {
                tracing::debug!("WAL writer stopped after final drain of {} records", count);
            }
            Err(e) => {
                self.metrics.incr(Counter::Errors);
                tracing::error!(
                    "Final WAL drain failed, {} records left buffered: {}",
                    self.buffer.len(),
                    e
                );
            }
        }
        self.events.record(
            "wal",
            format!(
                "writer stopped: {} records in {} batches",
                self.writer.records_written(),
                self.writer.batches_written()
            ),
        );
    }

    /// Write everything currently buffered as one batch
    ///
    /// On failure the batch goes back to the front of the buffer, so no
    /// record is lost. A retried batch may repeat lines that reached the file
    /// before the error; they carry the same LSN.
    pub fn drain(&mut self) -> Result<usize> {
        let batch = self.buffer.flush_and_clear();
        if batch.is_empty() {
            return Ok(0);
        }

        match self.writer.write_batch(&batch) {
            Ok(syncs) => {
                let count = batch.len();
                if let Some(max_lsn) = batch.iter().map(|r| r.lsn).max() {
                    self.lsn.mark_durable(max_lsn);
                }
                self.metrics.add(Counter::WalRecordsWritten, count as u64);
                self.metrics.incr(Counter::WalBatches);
                self.metrics.add(Counter::WalSyncs, syncs);
                tracing::trace!("WAL batch written: {} records, {} syncs", count, syncs);
                Ok(count)
            }
            Err(e) => {
                self.buffer.requeue_front(batch);
                Err(StoreError::WalWrite(e.to_string()))
            }
        }
    }
}
