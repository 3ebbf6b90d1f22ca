//! Error types for walstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for walstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Page Errors
    // -------------------------------------------------------------------------
    #[error("Page {0} not found")]
    PageNotFound(u32),

    #[error("Page {page_id} out of range (page count {page_count})")]
    PageOutOfRange { page_id: u32, page_count: u32 },

    #[error("Payload of {len} bytes does not fit a {page_size}-byte page")]
    PayloadTooLarge { len: usize, page_size: usize },

    #[error("Page {page_id} is {len} bytes on disk, expected {expected}")]
    CorruptPage {
        page_id: u32,
        len: usize,
        expected: usize,
    },

    // -------------------------------------------------------------------------
    // Cache Errors
    // -------------------------------------------------------------------------
    /// Non-fatal: the caller serves the page from the store instead.
    #[error("Page cache full (capacity {capacity})")]
    CacheFull { capacity: usize },

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Timed out waiting for {0} lock")]
    LockTimeout(&'static str),
}

impl StoreError {
    /// True for a missing page, whether reported by the store or by the OS
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::PageNotFound(_) => true,
            StoreError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
