//! Diagnostic event log
//!
//! A free-form, append-only performance log shared by every component.
//! It is not needed for correctness or recovery, so write failures are traced
//! and otherwise ignored.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::Result;
use crate::wal::unix_millis;

/// Buffered, lock-protected event log
pub struct EventLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl EventLog {
    /// Open or create the log in append mode
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one `<unix_ms> [<component>] <message>` line
    pub fn record(&self, component: &str, message: impl AsRef<str>) {
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(
            writer,
            "{} [{}] {}",
            unix_millis(),
            component,
            message.as_ref()
        ) {
            tracing::warn!("Event log write to {} failed: {}", self.path.display(), e);
        }
    }

    /// Push buffered lines to the file
    pub fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            tracing::warn!("Event log flush of {} failed: {}", self.path.display(), e);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}
