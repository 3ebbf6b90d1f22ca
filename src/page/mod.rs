//! Page Module
//!
//! Fixed-size pages persisted one file per page, fronted by a bounded cache.
//!
//! ## Responsibilities
//! - Exclusive writes, concurrent reads (single reader/writer lock)
//! - Dirty tracking until a checkpoint durably flushes the page
//! - Cache-assisted reads that never observe a partially written page
//!
//! ## On-Disk Layout
//! ```text
//! {data_dir}/pages/
//!   ├── page_0.dbp     (page_size bytes, rewritten in full on every write)
//!   ├── page_1.dbp
//!   └── ...
//! ```

mod cache;
mod store;

use std::time::Instant;

use bytes::Bytes;

use crate::error::{Result, StoreError};

pub use cache::{CachedPage, PageCache};
pub use store::PageStore;

/// Page identifier
pub type PageId = u32;

/// A page and its bookkeeping state
#[derive(Debug, Clone)]
pub struct Page {
    pub page_id: PageId,

    /// Exactly `page_size` bytes
    pub data: Bytes,

    /// Changed since the last durable flush
    pub dirty: bool,

    pub last_modified: Instant,
}

impl Page {
    /// An all-zero page
    pub fn zeroed(page_id: PageId, page_size: usize) -> Self {
        Self {
            page_id,
            data: Bytes::from(vec![0u8; page_size]),
            dirty: false,
            last_modified: Instant::now(),
        }
    }

    /// Build a page from a payload, zero-padding it to `page_size`
    pub fn from_payload(page_id: PageId, payload: &[u8], page_size: usize) -> Result<Self> {
        if payload.len() > page_size {
            return Err(StoreError::PayloadTooLarge {
                len: payload.len(),
                page_size,
            });
        }

        let mut data = vec![0u8; page_size];
        data[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            page_id,
            data: Bytes::from(data),
            dirty: true,
            last_modified: Instant::now(),
        })
    }

    /// Page content without the trailing zero padding
    pub fn payload(&self) -> &[u8] {
        trim_padding(&self.data)
    }

    pub fn is_zeroed(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

/// Strip trailing zero padding from raw page bytes
pub fn trim_padding(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &data[..end]
}
