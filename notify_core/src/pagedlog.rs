//! The paged-log store (§4.1): a cluster-shared array of fixed-size pages,
//! addressed by a monotonic page number, with per-page read/write pinning
//! under a "bank lock". This module is the one production implementation
//! of that external-collaborator contract; the rest of the crate only
//! depends on the [`PagedLog`] trait, so a real disk-backed or
//! shared-memory implementation can be swapped in without touching the
//! queue/reader/writer logic.
//!
//! Durability is explicitly out of scope (§1 Non-goals): pages live only
//! in process memory and vanish on restart.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// One page buffer plus its dirty bit.
pub struct PageSlot {
    buf: Box<[u8]>,
    dirty: bool,
}

impl PageSlot {
    fn zeroed(page_size: usize) -> Self {
        PageSlot {
            buf: vec![0u8; page_size].into_boxed_slice(),
            dirty: false,
        }
    }
}

/// A read-pinned page: the bank lock is held for the guard's lifetime.
pub struct PageReadGuard(OwnedRwLockReadGuard<PageSlot>);

impl PageReadGuard {
    pub fn buffer(&self) -> &[u8] {
        &self.0.buf
    }
}

/// A write-pinned page: the bank lock is held for the guard's lifetime.
pub struct PageWriteGuard(OwnedRwLockWriteGuard<PageSlot>);

impl PageWriteGuard {
    pub fn buffer(&mut self) -> &mut [u8] {
        &mut self.0.buf
    }

    pub fn mark_dirty(&mut self) {
        self.0.dirty = true;
    }
}

/// External collaborator contract (§4.1, §6). Implementors need not be
/// in-memory; the only requirement is that `bank_lock_for` return the same
/// lock for a given `page_no` for as long as that page has not been
/// truncated, and that pages start out zeroed.
#[async_trait]
pub trait PagedLog: Send + Sync {
    /// Allocate a fresh page, zero it, and return it write-pinned. Pages
    /// are always allocated in increasing order by the single writer
    /// path; re-allocating an existing page number is a caller bug.
    async fn zero_new_page(&self, page_no: u64) -> PageWriteGuard;

    /// Write-pin an already-allocated page.
    async fn write_pin(&self, page_no: u64) -> PageWriteGuard;

    /// Read-pin an already-allocated page.
    async fn read_pin(&self, page_no: u64) -> PageReadGuard;

    /// Drop every page strictly older than `page_no`. Pages at or after
    /// `page_no` are untouched.
    fn truncate_before(&self, page_no: u64);

    fn page_size(&self) -> usize;
}

/// In-memory paged log. Pages are kept in a concurrent map so that
/// independent pages can be pinned without contending on a single lock;
/// each page's own `RwLock` is the "bank lock" spec.md refers to.
pub struct InMemoryPagedLog {
    page_size: usize,
    pages: DashMap<u64, Arc<RwLock<PageSlot>>>,
    resident_pages: AtomicUsize,
}

impl InMemoryPagedLog {
    pub fn new(page_size: usize) -> Self {
        InMemoryPagedLog {
            page_size,
            pages: DashMap::new(),
            resident_pages: AtomicUsize::new(0),
        }
    }

    /// Number of pages currently resident. Exposed for tests and for a
    /// memory-pressure metric in an embedding server; not part of the
    /// `PagedLog` contract itself.
    pub fn resident_pages(&self) -> usize {
        self.resident_pages.load(Ordering::Relaxed)
    }

    fn slot_for(&self, page_no: u64) -> Arc<RwLock<PageSlot>> {
        self.pages
            .entry(page_no)
            .or_insert_with(|| {
                self.resident_pages.fetch_add(1, Ordering::Relaxed);
                Arc::new(RwLock::new(PageSlot::zeroed(self.page_size)))
            })
            .clone()
    }
}

#[async_trait]
impl PagedLog for InMemoryPagedLog {
    async fn zero_new_page(&self, page_no: u64) -> PageWriteGuard {
        let slot = self.slot_for(page_no);
        let mut guard = slot.write_owned().await;
        *guard = PageSlot::zeroed(self.page_size);
        PageWriteGuard(guard)
    }

    async fn write_pin(&self, page_no: u64) -> PageWriteGuard {
        let slot = self.slot_for(page_no);
        PageWriteGuard(slot.write_owned().await)
    }

    async fn read_pin(&self, page_no: u64) -> PageReadGuard {
        let slot = self.slot_for(page_no);
        PageReadGuard(slot.read_owned().await)
    }

    fn truncate_before(&self, page_no: u64) {
        self.pages.retain(|&page, _| page >= page_no);
        self.resident_pages.store(self.pages.len(), Ordering::Relaxed);
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
