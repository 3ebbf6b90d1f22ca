//! Page Cache
//!
//! Bounded map from page id to an immutable copy of the page bytes.
//!
//! Entries are never patched in place: every insert or refresh swaps in a new
//! `CachedPage`, so a reader holds either the old or the new bytes, never a
//! mix of both. Lookups hand out `Bytes`, which cannot be mutated.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use crate::config::CachePolicy;
use crate::error::{Result, StoreError};
use crate::metrics::{Counter, Metrics};

use super::PageId;

/// A cached, read-only copy of a page
#[derive(Debug)]
pub struct CachedPage {
    page_id: PageId,
    bytes: Bytes,
    reader_count: AtomicU32,
    in_cache: AtomicBool,
}

impl CachedPage {
    fn new(page_id: PageId, bytes: Bytes) -> Self {
        Self {
            page_id,
            bytes,
            reader_count: AtomicU32::new(0),
            in_cache: AtomicBool::new(true),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Number of lookups served from this entry
    pub fn reader_count(&self) -> u32 {
        self.reader_count.load(Ordering::Relaxed)
    }

    /// False once the entry was replaced or evicted
    pub fn is_resident(&self) -> bool {
        self.in_cache.load(Ordering::Acquire)
    }

    fn retire(&self) {
        self.in_cache.store(false, Ordering::Release);
    }
}

/// Bounded, thread-safe page cache
///
/// ## Policies
/// - `NoEviction`: once full, new pages are refused with `CacheFull` and the
///   caller serves them from the store.
/// - `Lru`: the least recently used page makes room for the new one.
pub struct PageCache {
    capacity: usize,
    policy: CachePolicy,

    /// None when capacity is zero (cache disabled)
    entries: Option<Mutex<LruCache<PageId, Arc<CachedPage>>>>,

    metrics: Arc<dyn Metrics>,
}

impl PageCache {
    pub fn new(capacity: usize, policy: CachePolicy, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            capacity,
            policy,
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            metrics,
        }
    }

    /// Look up a page, counting a hit or a miss
    pub fn try_get(&self, page_id: PageId) -> Option<Bytes> {
        let entry = self
            .entries
            .as_ref()
            .and_then(|entries| entries.lock().get(&page_id).cloned());

        match entry {
            Some(entry) => {
                entry.reader_count.fetch_add(1, Ordering::Relaxed);
                self.metrics.incr(Counter::CacheHits);
                Some(entry.bytes.clone())
            }
            None => {
                self.metrics.incr(Counter::CacheMisses);
                None
            }
        }
    }

    /// Insert or replace a page
    ///
    /// Replacing an existing entry always succeeds. A new page is refused with
    /// `CacheFull` when the cache is full under `NoEviction` or disabled.
    pub fn insert(&self, page_id: PageId, bytes: Bytes) -> Result<()> {
        let entries = self.entries.as_ref().ok_or(StoreError::CacheFull { capacity: 0 })?;
        let mut entries = entries.lock();

        if entries.contains(&page_id) {
            if let Some(old) = entries.put(page_id, Arc::new(CachedPage::new(page_id, bytes))) {
                old.retire();
            }
            return Ok(());
        }

        if entries.len() >= self.capacity && self.policy == CachePolicy::NoEviction {
            return Err(StoreError::CacheFull {
                capacity: self.capacity,
            });
        }

        if let Some((evicted_id, evicted)) =
            entries.push(page_id, Arc::new(CachedPage::new(page_id, bytes)))
        {
            evicted.retire();
            tracing::trace!("Evicted page {} from cache", evicted_id);
        }
        Ok(())
    }

    /// Replace a cached page after a successful store write
    ///
    /// Returns false if the page was not cached.
    pub fn invalidate_or_refresh(&self, page_id: PageId, bytes: Bytes) -> bool {
        let Some(entries) = self.entries.as_ref() else {
            return false;
        };
        let mut entries = entries.lock();

        match entries.peek_mut(&page_id) {
            Some(slot) => {
                let old = std::mem::replace(slot, Arc::new(CachedPage::new(page_id, bytes)));
                old.retire();
                true
            }
            None => false,
        }
    }

    /// Drop a page from the cache
    pub fn remove(&self, page_id: PageId) -> bool {
        let Some(entries) = self.entries.as_ref() else {
            return false;
        };
        match entries.lock().pop(&page_id) {
            Some(old) => {
                old.retire();
                true
            }
            None => false,
        }
    }

    /// Current entry for a page without touching recency or counters
    pub fn entry(&self, page_id: PageId) -> Option<Arc<CachedPage>> {
        self.entries
            .as_ref()
            .and_then(|entries| entries.lock().peek(&page_id).cloned())
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries
            .as_ref()
            .is_some_and(|entries| entries.lock().contains(&page_id))
    }

    /// Snapshot of cached page ids (most recently used first)
    pub fn page_ids(&self) -> Vec<PageId> {
        match self.entries.as_ref() {
            Some(entries) => entries.lock().iter().map(|(id, _)| *id).collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }
}
