//! Page Store
//!
//! Durable storage of fixed-size pages keyed by id.
//!
//! ## Concurrency:
//! - `table`: a single RwLock over the whole store. `read_page` takes it
//!   shared, `write_page`/`flush_page` take it exclusive, so no reader can
//!   observe a page file while it is being rewritten.
//! - The cache is updated while the lock is still held. A writer refreshes
//!   the cached copy before releasing the exclusive lock, and a reader
//!   populating the cache after a miss does so under the shared lock, so a
//!   stale copy can never be inserted after a newer write.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::metrics::{Counter, Metrics};

use super::{Page, PageCache, PageId};

/// Pages are rewritten in sector-sized pieces
const IO_CHUNK_SIZE: usize = 512;

/// Per-page bookkeeping guarded by the store lock
#[derive(Debug, Clone, Copy)]
struct PageState {
    dirty: bool,
    last_modified: Instant,
}

#[derive(Debug, Default)]
struct PageTable {
    pages: HashMap<PageId, PageState>,
}

impl PageTable {
    fn mark_dirty(&mut self, page_id: PageId) -> PageState {
        let state = PageState {
            dirty: true,
            last_modified: Instant::now(),
        };
        self.pages.insert(page_id, state);
        state
    }

    fn mark_clean(&mut self, page_id: PageId) -> PageState {
        let state = self.pages.entry(page_id).or_insert(PageState {
            dirty: false,
            last_modified: Instant::now(),
        });
        state.dirty = false;
        *state
    }

    fn state(&self, page_id: PageId) -> Option<PageState> {
        self.pages.get(&page_id).copied()
    }
}

/// Manages the on-disk pages
pub struct PageStore {
    /// Directory holding `page_<id>.dbp` files
    pages_dir: PathBuf,

    page_size: usize,
    page_count: u32,

    /// None blocks; Some bounds every lock wait
    lock_timeout: Option<Duration>,

    /// The single reader/writer lock over on-disk page bytes
    table: RwLock<PageTable>,

    cache: Arc<PageCache>,
    metrics: Arc<dyn Metrics>,
}

impl PageStore {
    /// Open or create a store in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover existing page files (treated as clean)
    /// 3. Format every missing id in `0..page_count` as a zero page
    pub fn open(
        path: &Path,
        config: &Config,
        cache: Arc<PageCache>,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut table = PageTable::default();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();

            if !file_path.is_file() {
                continue;
            }
            if file_path.extension().is_some_and(|ext| ext == "tmp") {
                // Interrupted write; the page file still holds the old bytes
                fs::remove_file(&file_path)?;
            } else if let Some(id) = Self::parse_page_id(&file_path) {
                table.mark_clean(id);
            }
        }

        let discovered = table.pages.len();
        let zero_page = vec![0u8; config.page_size];
        let mut formatted = 0;
        for id in 0..config.page_count {
            if table.state(id).is_none() {
                write_page_file(&Self::page_path_with_dir(path, id), &zero_page, true)?;
                table.mark_clean(id);
                formatted += 1;
            }
        }

        tracing::debug!(
            "Opened page store at {}: {} pages discovered, {} formatted",
            path.display(),
            discovered,
            formatted
        );

        Ok(Self {
            pages_dir: path.to_path_buf(),
            page_size: config.page_size,
            page_count: config.page_count,
            lock_timeout: config.lock_timeout,
            table: RwLock::new(table),
            cache,
            metrics,
        })
    }

    /// Read a page straight from disk under the shared lock
    pub fn read_page(&self, page_id: PageId) -> Result<Bytes> {
        self.check_range(page_id)?;
        let _table = self.read_table()?;
        self.read_locked(page_id)
    }

    /// Cache-assisted read
    ///
    /// Serves from the cache when possible; otherwise reads the store and
    /// populates the cache before releasing the shared lock. A full cache
    /// (`NoEviction`) just means the page is served from the store.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Bytes> {
        self.check_range(page_id)?;
        if let Some(bytes) = self.cache.try_get(page_id) {
            return Ok(bytes);
        }

        let _table = self.read_table()?;
        let bytes = self.read_locked(page_id)?;
        if let Err(e) = self.cache.insert(page_id, bytes.clone()) {
            tracing::trace!("Page {} served uncached: {}", page_id, e);
        }
        Ok(bytes)
    }

    /// Overwrite a page with `payload`, zero-padded to the page size
    ///
    /// Steps (all under the exclusive lock):
    /// 1. Rewrite the page file
    /// 2. Mark the page dirty
    /// 3. Refresh or insert the cached copy
    ///
    /// A failed write leaves the cache and the write counter untouched.
    pub fn write_page(&self, page_id: PageId, payload: &[u8]) -> Result<()> {
        self.check_range(page_id)?;
        let page = Page::from_payload(page_id, payload, self.page_size)?;

        let mut table = self.write_table()?;
        write_page_file(&self.page_path(page_id), &page.data, false)?;
        table.mark_dirty(page_id);

        if !self.cache.invalidate_or_refresh(page_id, page.data.clone()) {
            if let Err(e) = self.cache.insert(page_id, page.data) {
                tracing::trace!("Page {} not cached after write: {}", page_id, e);
            }
        }
        drop(table);

        self.metrics.incr(Counter::Writes);
        Ok(())
    }

    /// Durably persist a page's current bytes and clear its dirty flag
    ///
    /// Re-reads the bytes under the exclusive lock, so a flush never rolls a
    /// page back to an older version. Used by the checkpoint coordinator.
    pub fn flush_page(&self, page_id: PageId) -> Result<Page> {
        self.check_range(page_id)?;
        let mut table = self.write_table()?;

        let path = self.page_path(page_id);
        let data = self.read_file(page_id, &path)?;
        write_page_file(&path, &data, true)?;
        let state = table.mark_clean(page_id);

        Ok(Page {
            page_id,
            data,
            dirty: state.dirty,
            last_modified: state.last_modified,
        })
    }

    /// Current bytes and bookkeeping for a page
    pub fn page(&self, page_id: PageId) -> Result<Page> {
        self.check_range(page_id)?;
        let table = self.read_table()?;
        let data = self.read_locked(page_id)?;
        let state = table.state(page_id).unwrap_or(PageState {
            dirty: false,
            last_modified: Instant::now(),
        });

        Ok(Page {
            page_id,
            data,
            dirty: state.dirty,
            last_modified: state.last_modified,
        })
    }

    /// Snapshot of pages written since their last flush, in id order
    pub fn dirty_pages(&self) -> Result<Vec<PageId>> {
        let table = self.read_table()?;
        let mut dirty: Vec<PageId> = table
            .pages
            .iter()
            .filter(|(_, state)| state.dirty)
            .map(|(id, _)| *id)
            .collect();
        dirty.sort_unstable();
        Ok(dirty)
    }

    pub fn is_dirty(&self, page_id: PageId) -> Result<bool> {
        Ok(self
            .read_table()?
            .state(page_id)
            .is_some_and(|state| state.dirty))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn pages_dir(&self) -> &Path {
        &self.pages_dir
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// File path of a page
    pub fn page_path(&self, page_id: PageId) -> PathBuf {
        Self::page_path_with_dir(&self.pages_dir, page_id)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read_table(&self) -> Result<RwLockReadGuard<'_, PageTable>> {
        match self.lock_timeout {
            Some(timeout) => self
                .table
                .try_read_for(timeout)
                .ok_or(StoreError::LockTimeout("page store read")),
            None => Ok(self.table.read()),
        }
    }

    fn write_table(&self) -> Result<RwLockWriteGuard<'_, PageTable>> {
        match self.lock_timeout {
            Some(timeout) => self
                .table
                .try_write_for(timeout)
                .ok_or(StoreError::LockTimeout("page store write")),
            None => Ok(self.table.write()),
        }
    }

    /// Read a page file; caller holds the store lock
    fn read_locked(&self, page_id: PageId) -> Result<Bytes> {
        let data = self.read_file(page_id, &self.page_path(page_id))?;
        self.metrics.incr(Counter::Reads);
        Ok(data)
    }

    fn read_file(&self, page_id: PageId, path: &Path) -> Result<Bytes> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::PageNotFound(page_id))
            }
            Err(e) => return Err(e.into()),
        };

        if data.len() != self.page_size {
            return Err(StoreError::CorruptPage {
                page_id,
                len: data.len(),
                expected: self.page_size,
            });
        }
        Ok(Bytes::from(data))
    }

    fn check_range(&self, page_id: PageId) -> Result<()> {
        if page_id >= self.page_count {
            return Err(StoreError::PageOutOfRange {
                page_id,
                page_count: self.page_count,
            });
        }
        Ok(())
    }

    /// Generate page path given a directory and ID
    fn page_path_with_dir(dir: &Path, page_id: PageId) -> PathBuf {
        dir.join(format!("page_{}.dbp", page_id))
    }

    /// Parse page ID from filename
    /// "page_42.dbp" → Some(42)
    fn parse_page_id(path: &Path) -> Option<PageId> {
        if path.extension()? != "dbp" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name.strip_prefix("page_")?;
        id_str.parse().ok()
    }
}

/// Replace a page file with `data`
///
/// The bytes go to `page_<id>.dbp.tmp` in sector-sized chunks and are renamed
/// over the page file, so a failure partway through leaves the previous page
/// intact and no reader can see a mix of old and new chunks.
fn write_page_file(path: &Path, data: &[u8], durable: bool) -> io::Result<()> {
    let tmp_path = temp_page_path(path);
    let written =
        write_chunks(&tmp_path, data, durable).and_then(|()| fs::rename(&tmp_path, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    if durable {
        sync_parent_dir(path)?;
    }
    Ok(())
}

fn write_chunks(path: &Path, data: &[u8], durable: bool) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    for chunk in data.chunks(IO_CHUNK_SIZE) {
        file.write_all(chunk)?;
    }

    if durable {
        file.sync_all()?;
    }
    Ok(())
}

fn temp_page_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Persist the rename itself
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) => fs::File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
