//! In-memory implementation of the PageStore trait.
//!
//! This is primarily for testing. It follows the SQLite store's semantics
//! (staged writes, truncate on commit, journal mode) but keeps every page in
//! memory with no persistence.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use pagesync_core::{PageNumber, PageSize};

use crate::error::{Result, StoreError};
use crate::traits::{JournalMode, OpenMode, OpenStore, PageStore};

/// In-memory page store.
///
/// Clones share the same pages, so a test can hand one clone to the sync
/// engine and inspect another afterwards.
#[derive(Clone)]
pub struct MemoryPageStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

struct MemoryStoreInner {
    page_size: PageSize,
    /// Committed pages; index 0 holds page 1.
    pages: Vec<Bytes>,
    journal_mode: JournalMode,
    /// Byte offset of the lock-byte range, if the exclusion is enabled.
    lock_byte_offset: Option<u64>,
    txn: Txn,
}

enum Txn {
    None,
    Read,
    Write(PendingWrites),
}

#[derive(Default)]
struct PendingWrites {
    pages: BTreeMap<u32, Bytes>,
    truncate_to: Option<u32>,
}

impl MemoryStoreInner {
    fn effective_count(&self) -> u32 {
        let committed = self.pages.len() as u32;
        match &self.txn {
            Txn::Write(pending) => {
                let base = pending.truncate_to.map_or(committed, |n| n.min(committed));
                let written = pending.pages.keys().next_back().copied().unwrap_or(0);
                base.max(written)
            }
            _ => committed,
        }
    }

    fn effective_page(&self, pgno: u32) -> Option<Bytes> {
        if pgno == 0 || pgno > self.effective_count() {
            return None;
        }
        if let Txn::Write(pending) = &self.txn {
            if let Some(data) = pending.pages.get(&pgno) {
                return Some(data.clone());
            }
            if pending.truncate_to.is_some_and(|n| pgno > n) {
                return Some(self.zero_page());
            }
        }
        Some(
            self.pages
                .get(pgno as usize - 1)
                .cloned()
                .unwrap_or_else(|| self.zero_page()),
        )
    }

    fn zero_page(&self) -> Bytes {
        Bytes::from(vec![0u8; self.page_size.bytes()])
    }
}

impl MemoryPageStore {
    /// Create an empty store, as a database file that does not exist yet.
    pub fn new() -> Self {
        Self::from_parts(PageSize::DEFAULT, Vec::new(), JournalMode::Delete)
    }

    /// Create a WAL-mode store holding the given pages.
    ///
    /// Pages shorter than `page_size` are zero-padded; longer ones are cut.
    pub fn with_pages(page_size: PageSize, pages: Vec<Vec<u8>>) -> Self {
        let pages = pages
            .into_iter()
            .map(|mut page| {
                page.resize(page_size.bytes(), 0);
                Bytes::from(page)
            })
            .collect();
        Self::from_parts(page_size, pages, JournalMode::Wal)
    }

    fn from_parts(page_size: PageSize, pages: Vec<Bytes>, mode: JournalMode) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryStoreInner {
                page_size,
                pages,
                journal_mode: mode,
                lock_byte_offset: None,
                txn: Txn::None,
            })),
        }
    }

    /// Set the reported journal mode.
    pub fn with_journal_mode(self, mode: JournalMode) -> Self {
        if let Ok(mut inner) = self.inner.write() {
            inner.journal_mode = mode;
        }
        self
    }

    /// Exclude the page containing `offset` from comparison, the way a
    /// file-backed store reserves its lock-byte page.
    pub fn with_lock_byte_offset(self, offset: u64) -> Self {
        if let Ok(mut inner) = self.inner.write() {
            inner.lock_byte_offset = Some(offset);
        }
        self
    }

    /// Snapshot of the committed pages.
    pub fn pages(&self) -> Result<Vec<Bytes>> {
        Ok(self.read()?.pages.clone())
    }

    /// Replace one committed page outside of any transaction.
    ///
    /// Used by tests to simulate writes to a live origin between syncs.
    pub fn set_page(&self, pgno: PageNumber, data: Vec<u8>) -> Result<()> {
        let mut inner = self.write()?;
        let expected = inner.page_size.bytes();
        if data.len() != expected {
            return Err(StoreError::PageLength {
                pgno: pgno.get(),
                expected,
                actual: data.len(),
            });
        }
        let index = pgno.get() as usize - 1;
        if index >= inner.pages.len() {
            let zero = inner.zero_page();
            inner.pages.resize(index + 1, zero);
        }
        inner.pages[index] = Bytes::from(data);
        Ok(())
    }

    /// Drop committed pages past `page_count` outside of any transaction.
    pub fn shrink_to(&self, page_count: u32) -> Result<()> {
        self.write()?.pages.truncate(page_count as usize);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn page_size(&self) -> Result<PageSize> {
        Ok(self.read()?.page_size)
    }

    async fn page_count(&self) -> Result<u32> {
        Ok(self.read()?.effective_count())
    }

    async fn journal_mode(&self) -> Result<JournalMode> {
        Ok(self.read()?.journal_mode.clone())
    }

    async fn initialize(&self, page_size: PageSize) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.pages.is_empty() {
            return Err(StoreError::AlreadyInitialized(inner.pages.len() as u32));
        }
        inner.page_size = page_size;
        inner.journal_mode = JournalMode::Wal;
        Ok(())
    }

    fn lock_byte_page(&self, page_size: PageSize) -> Option<PageNumber> {
        let offset = self.inner.read().ok()?.lock_byte_offset?;
        let pgno = u32::try_from(offset / u64::from(page_size.get()) + 1).ok()?;
        PageNumber::new(pgno).ok()
    }

    async fn begin_read(&self) -> Result<()> {
        let mut inner = self.write()?;
        if !matches!(inner.txn, Txn::None) {
            return Err(StoreError::Transaction("transaction already open".into()));
        }
        inner.txn = Txn::Read;
        Ok(())
    }

    async fn begin_write(&self) -> Result<()> {
        let mut inner = self.write()?;
        if !matches!(inner.txn, Txn::None) {
            return Err(StoreError::Transaction("transaction already open".into()));
        }
        inner.txn = Txn::Write(PendingWrites::default());
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut inner = self.write()?;
        let count = inner.effective_count();
        match std::mem::replace(&mut inner.txn, Txn::None) {
            Txn::None => Err(StoreError::Transaction("no transaction to commit".into())),
            Txn::Read => Ok(()),
            Txn::Write(pending) => {
                let zero = inner.zero_page();
                if let Some(n) = pending.truncate_to {
                    inner.pages.truncate(n as usize);
                }
                inner.pages.resize(count as usize, zero);
                for (pgno, data) in pending.pages {
                    if pgno <= count {
                        inner.pages[pgno as usize - 1] = data;
                    }
                }
                Ok(())
            }
        }
    }

    async fn rollback(&self) -> Result<()> {
        let mut inner = self.write()?;
        if matches!(inner.txn, Txn::None) {
            return Err(StoreError::Transaction("no transaction to roll back".into()));
        }
        inner.txn = Txn::None;
        Ok(())
    }

    async fn read_page(&self, pgno: PageNumber) -> Result<Option<Bytes>> {
        Ok(self.read()?.effective_page(pgno.get()))
    }

    async fn write_page(&self, pgno: PageNumber, data: Bytes) -> Result<()> {
        let mut inner = self.write()?;
        let expected = inner.page_size.bytes();
        if data.len() != expected {
            return Err(StoreError::PageLength {
                pgno: pgno.get(),
                expected,
                actual: data.len(),
            });
        }
        match &mut inner.txn {
            Txn::Write(pending) => {
                pending.pages.insert(pgno.get(), data);
                Ok(())
            }
            _ => Err(StoreError::Transaction(
                "write outside of a write transaction".into(),
            )),
        }
    }

    async fn truncate(&self, page_count: u32) -> Result<()> {
        let mut inner = self.write()?;
        match &mut inner.txn {
            Txn::Write(pending) => {
                pending.pages.retain(|&pgno, _| pgno <= page_count);
                pending.truncate_to = Some(page_count);
                Ok(())
            }
            _ => Err(StoreError::Transaction(
                "truncate outside of a write transaction".into(),
            )),
        }
    }

    async fn close(&self) -> Result<()> {
        self.write()?.txn = Txn::None;
        Ok(())
    }
}

#[async_trait]
impl OpenStore for MemoryPageStore {
    type Store = MemoryPageStore;

    async fn open(&self, _mode: OpenMode) -> Result<Self::Store> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
