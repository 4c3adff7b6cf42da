//! Store traits: the abstract interface for page-level database access.
//!
//! The sync engine is storage-agnostic. It needs a page count, a page size,
//! page reads and writes keyed by 1-based page number, and a transaction
//! around a batch of writes. Implementations include SQLite (primary) and
//! in-memory (for tests).

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use pagesync_core::{fingerprint, Fingerprint, PageNumber, PageSize};

use crate::error::Result;

/// The consistency mode reported by a store.
///
/// Only write-ahead-log mode lets the origin hold a read transaction while
/// other processes keep writing, so the engine refuses anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalMode {
    Wal,
    Delete,
    Truncate,
    Persist,
    Memory,
    Off,
    Other(String),
}

impl JournalMode {
    /// Parse the value of `PRAGMA journal_mode`.
    pub fn from_pragma(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "wal" => Self::Wal,
            "delete" => Self::Delete,
            "truncate" => Self::Truncate,
            "persist" => Self::Persist,
            "memory" => Self::Memory,
            "off" => Self::Off,
            _ => Self::Other(value.to_string()),
        }
    }

    /// Whether this is write-ahead-log mode.
    pub fn is_wal(&self) -> bool {
        matches!(self, Self::Wal)
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wal => f.write_str("wal"),
            Self::Delete => f.write_str("delete"),
            Self::Truncate => f.write_str("truncate"),
            Self::Persist => f.write_str("persist"),
            Self::Memory => f.write_str("memory"),
            Self::Off => f.write_str("off"),
            Self::Other(mode) => f.write_str(mode),
        }
    }
}

/// Which side of a session a store is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing database, read under a read transaction.
    Origin,
    /// Database that may not exist yet, written under a write transaction.
    Replica,
}

/// The PageStore trait: async page-level access to one database.
///
/// All methods are async so that blocking backends (SQLite) can run on
/// `spawn_blocking` without stalling the session.
///
/// # Design Notes
///
/// - **Reads see pending writes**: inside a write transaction, `page_count`
///   and `read_page` reflect pages written so far.
/// - **Truncate on write**: `truncate(n)` drops every page after `n` when the
///   transaction commits.
/// - **Rollback**: nothing written after `begin_write` survives `rollback`.
#[async_trait]
pub trait PageStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Geometry
    // ─────────────────────────────────────────────────────────────────────────

    /// Page size of the database.
    async fn page_size(&self) -> Result<PageSize>;

    /// Number of pages in the database.
    async fn page_count(&self) -> Result<u32>;

    /// Current consistency mode.
    async fn journal_mode(&self) -> Result<JournalMode>;

    /// Set up a brand-new, empty database with the given page size in
    /// write-ahead-log mode.
    async fn initialize(&self, page_size: PageSize) -> Result<()>;

    /// The page reserved for locking metadata at this page size, if any.
    ///
    /// That page is never compared or transferred.
    fn lock_byte_page(&self, page_size: PageSize) -> Option<PageNumber>;

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a read transaction (origin side).
    async fn begin_read(&self) -> Result<()>;

    /// Start a write transaction (replica side).
    async fn begin_write(&self) -> Result<()>;

    /// Commit the current transaction.
    async fn commit(&self) -> Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&self) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Pages
    // ─────────────────────────────────────────────────────────────────────────

    /// Read one page. Returns `None` past the end of the database.
    async fn read_page(&self, pgno: PageNumber) -> Result<Option<Bytes>>;

    /// Overwrite (or append) one page.
    async fn write_page(&self, pgno: PageNumber, data: Bytes) -> Result<()>;

    /// Shrink the database to `page_count` pages.
    async fn truncate(&self, page_count: u32) -> Result<()>;

    /// Fingerprint one page. Returns `None` past the end of the database.
    async fn fingerprint_page(&self, pgno: PageNumber) -> Result<Option<Fingerprint>> {
        Ok(self.read_page(pgno).await?.map(|data| fingerprint(&data)))
    }

    /// Release the store, rolling back any open transaction.
    async fn close(&self) -> Result<()>;
}

/// Opens a [`PageStore`] for one side of a session.
#[async_trait]
pub trait OpenStore: Send + Sync {
    /// The store type produced.
    type Store: PageStore;

    /// Open the store for the given role.
    async fn open(&self, mode: OpenMode) -> Result<Self::Store>;

    /// Human-readable name of what is being opened (usually a path).
    fn describe(&self) -> String;
}
