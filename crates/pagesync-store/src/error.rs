//! Error types for the store module.

use thiserror::Error;

use pagesync_core::CoreError;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Page geometry error.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// A page buffer had the wrong length.
    #[error("page {pgno} has {actual} bytes, expected {expected}")]
    PageLength {
        pgno: u32,
        expected: usize,
        actual: usize,
    },

    /// The store was used outside of a transaction, or a transaction was
    /// started twice.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The store cannot be initialized because it already has content.
    #[error("store already initialized with {0} pages")]
    AlreadyInitialized(u32),

    /// Cannot open the underlying file.
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    /// A lock guarding the store was poisoned.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// A blocking task running a store operation failed.
    #[error("blocking task failed: {0}")]
    Blocking(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
