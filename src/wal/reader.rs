//! WAL Reader
//!
//! Reads records back from the WAL file, one line at a time.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Result, StoreError};

use super::WalRecord;

/// Reads records from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    line: Vec<u8>,
    line_number: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            line: Vec::new(),
            line_number: 0,
        })
    }

    /// Read the next record, skipping blank lines
    ///
    /// A malformed line, including one that is not valid UTF-8, is reported
    /// as `WalCorruption`; reading can continue with the following line.
    pub fn next_record(&mut self) -> Result<Option<WalRecord>> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            let line = std::str::from_utf8(&self.line).map_err(|e| {
                StoreError::WalCorruption(format!("line is not valid UTF-8: {}", e))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            return line.parse().map(Some);
        }
    }

    /// Number of lines consumed so far
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    /// Iterate over all records
    pub fn records(self) -> WalIterator {
        WalIterator { reader: self }
    }

    /// Read every record, failing on the first malformed line
    pub fn read_all(path: &Path) -> Result<Vec<WalRecord>> {
        Self::open(path)?.records().collect()
    }
}

/// Iterator over WAL records
pub struct WalIterator {
    reader: WalReader,
}

impl Iterator for WalIterator {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_record().transpose()
    }
}
