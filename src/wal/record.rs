//! WAL record definitions
//!
//! One line of the transaction log.

use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;
use crate::page::PageId;

/// Operations a transaction can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Select,
        Operation::Insert,
        Operation::Update,
        Operation::Delete,
    ];

    /// True for operations that write the page
    pub fn is_write(self) -> bool {
        !matches!(self, Operation::Select)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SELECT" => Ok(Operation::Select),
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(StoreError::WalCorruption(format!(
                "Unknown operation: {}",
                other
            ))),
        }
    }
}

/// A single record in the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub transaction_id: u64,

    /// Log Sequence Number - unique and monotonically increasing
    pub lsn: u64,

    pub thread_id: u32,
    pub operation: Operation,
    pub page_id: PageId,

    /// Payload size in bytes
    pub size: usize,

    /// Unix millis when the record was created
    pub timestamp: u64,

    /// false for the pre-operation record, true for the post-commit record
    pub committed: bool,
}

impl fmt::Display for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TXN:{}|LSN:{}|THREAD:{}|OP:{}|PAGE:{}|SIZE:{}|TS:{}|COMMITTED:{}",
            self.transaction_id,
            self.lsn,
            self.thread_id,
            self.operation,
            self.page_id,
            self.size,
            self.timestamp,
            if self.committed { "YES" } else { "NO" }
        )
    }
}

impl FromStr for WalRecord {
    type Err = StoreError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.trim_end().split('|');
        let mut next = |name: &'static str| field(&mut fields, name, line);

        let transaction_id = parse_number(next("TXN")?, "TXN")?;
        let lsn = parse_number(next("LSN")?, "LSN")?;
        let thread_id = parse_number(next("THREAD")?, "THREAD")?;
        let operation = next("OP")?.parse()?;
        let page_id = parse_number(next("PAGE")?, "PAGE")?;
        let size = parse_number(next("SIZE")?, "SIZE")?;
        let timestamp = parse_number(next("TS")?, "TS")?;
        let committed = match next("COMMITTED")? {
            "YES" => true,
            "NO" => false,
            other => {
                return Err(StoreError::WalCorruption(format!(
                    "Invalid COMMITTED value: {}",
                    other
                )))
            }
        };

        if fields.next().is_some() {
            return Err(StoreError::WalCorruption(format!(
                "Trailing fields in {:?}",
                line
            )));
        }

        Ok(Self {
            transaction_id,
            lsn,
            thread_id,
            operation,
            page_id,
            size,
            timestamp,
            committed,
        })
    }
}

/// Take the next `NAME:value` field and return its value
fn field<'a>(
    fields: &mut std::str::Split<'a, char>,
    name: &str,
    line: &str,
) -> Result<&'a str, StoreError> {
    let field = fields.next().ok_or_else(|| {
        StoreError::WalCorruption(format!("Missing {} field in {:?}", name, line))
    })?;
    field
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| StoreError::WalCorruption(format!("Expected {} field, got {:?}", name, field)))
}

fn parse_number<T: FromStr>(value: &str, name: &str) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::WalCorruption(format!("Invalid {} value: {:?}", name, value)))
}
