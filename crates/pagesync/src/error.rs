//! Error types for the pagesync facade.

use pagesync_store::StoreError;
use pagesync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur before or around a sync session.
#[derive(Debug, Error)]
pub enum PagesyncError {
    /// Bad command-line usage.
    #[error("{0}")]
    Usage(String),

    /// Both endpoints name a remote host.
    #[error("At least one of ORIGIN and REPLICA must be a local database\nYou provided two remote databases.")]
    BothRemote,

    /// An argument cannot be passed safely through the remote shell.
    #[error("cannot escape argument {arg:?} for the shell: {reason}")]
    Escape { arg: String, reason: &'static str },

    /// Sync error.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, PagesyncError>;
