//! Error types for the sync module.

use thiserror::Error;

use pagesync_core::CoreError;
use pagesync_store::StoreError;

/// Errors that can occur during a sync session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Invalid page geometry.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Reading from the peer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing to the peer failed. Nothing more can be delivered.
    #[error("write to peer failed: {0}")]
    Write(std::io::Error),

    /// The peer's output ended in the middle of a message.
    #[error("failed to read {what}: unexpected end of input")]
    ShortRead { what: &'static str },

    /// A tag byte no known message starts with.
    #[error("Unknown message 0x{tag:02x} {offset} bytes into conversation")]
    UnknownMessage { tag: u8, offset: u64 },

    /// A message that cannot be decoded in the current state.
    #[error("protocol framing lost: {0}")]
    Framing(String),

    /// A well-formed message that is not valid here.
    #[error("{0}")]
    Protocol(String),

    /// The peer insists on a protocol version this side cannot speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The two databases use different page sizes.
    #[error("page size mismatch; origin is {origin} bytes and replica is {replica} bytes")]
    PageSizeMismatch { origin: u32, replica: u32 },

    /// A database is not in write-ahead-log mode.
    #[error("{side} database is not in WAL mode")]
    NotWal { side: &'static str },

    /// The peer process could not be started.
    #[error("could not start auxiliary process: {0}")]
    Spawn(String),
}

impl SyncError {
    /// Whether the conversation cannot continue after this error.
    ///
    /// Read failures lose message framing and write failures mean the peer
    /// can no longer be told anything.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Write(_)
                | Self::ShortRead { .. }
                | Self::UnknownMessage { .. }
                | Self::Framing(_)
                | Self::Spawn(_)
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_message_text() {
        let err = SyncError::UnknownMessage {
            tag: 0x7f,
            offset: 12,
        };
        assert_eq!(
            err.to_string(),
            "Unknown message 0x7f 12 bytes into conversation"
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_logical_errors_are_not_fatal() {
        assert!(!SyncError::NotWal { side: "origin" }.is_fatal());
        assert!(!SyncError::PageSizeMismatch {
            origin: 4096,
            replica: 1024
        }
        .is_fatal());
        assert_eq!(
            SyncError::NotWal { side: "replica" }.to_string(),
            "replica database is not in WAL mode"
        );
    }
}
