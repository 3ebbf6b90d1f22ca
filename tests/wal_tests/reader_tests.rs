//! Tests for WAL Reader
//!
//! These tests verify:
//! - Reading records back in file order
//! - Blank lines are skipped
//! - Malformed lines are reported without ending the scan

use std::fs;

use tempfile::TempDir;
use walstore::error::StoreError;
use walstore::wal::WalReader;

use crate::{record, transaction_pairs};

#[test]
fn test_read_all_in_order() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("wal.log");
    let records = transaction_pairs(3);
    let text: String = records.iter().map(|r| format!("{}\n", r)).collect();
    fs::write(&path, text).unwrap();

    assert_eq!(WalReader::read_all(&path).unwrap(), records);
}

#[test]
fn test_blank_lines_are_skipped() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("wal.log");
    fs::write(
        &path,
        format!("\n{}\n\n{}\n\n", record(1, 1, false), record(1, 2, true)),
    )
    .unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert_eq!(reader.next_record().unwrap().unwrap().lsn, 1);
    assert_eq!(reader.next_record().unwrap().unwrap().lsn, 2);
    assert!(reader.next_record().unwrap().is_none());
    assert_eq!(reader.line_number(), 5);
}

#[test]
fn test_malformed_line_then_continue() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("wal.log");
    fs::write(
        &path,
        format!("{}\nTXN:2|LSN:garbage\n{}\n", record(1, 1, false), record(1, 2, true)),
    )
    .unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert!(reader.next_record().unwrap().is_some());
    assert!(matches!(reader.next_record(), Err(StoreError::WalCorruption(_))));
    assert_eq!(reader.next_record().unwrap().unwrap().lsn, 2);
    assert!(reader.next_record().unwrap().is_none());
}

#[test]
fn test_read_all_fails_on_corruption() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("wal.log");
    fs::write(&path, format!("{}\nnot a record\n", record(1, 1, false))).unwrap();

    assert!(matches!(
        WalReader::read_all(&path),
        Err(StoreError::WalCorruption(_))
    ));
}

#[test]
fn test_iterator_yields_every_record() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("wal.log");
    let records = transaction_pairs(10);
    let text: String = records.iter().map(|r| format!("{}\n", r)).collect();
    fs::write(&path, text).unwrap();

    let lsns: Vec<u64> = WalReader::open(&path)
        .unwrap()
        .records()
        .map(|r| r.unwrap().lsn)
        .collect();
    assert_eq!(lsns, (1..=20).collect::<Vec<_>>());
}
