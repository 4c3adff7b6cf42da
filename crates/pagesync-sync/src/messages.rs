//! Wire protocol message types.
//!
//! Every message is a single tag byte followed by a tag-specific payload.
//! Tags sent by the origin are upper-case ASCII letters starting at `A`;
//! tags sent by the replica are the matching lower-case letters.

use std::fmt;

use bytes::Bytes;

use pagesync_core::{Fingerprint, PageNumber, PageSize};

/// Highest protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tag bytes.
pub mod tags {
    pub const ORIGIN_BEGIN: u8 = 0x41;
    pub const ORIGIN_END: u8 = 0x42;
    pub const ORIGIN_ERROR: u8 = 0x43;
    pub const ORIGIN_PAGE: u8 = 0x44;
    pub const ORIGIN_TXN: u8 = 0x45;
    pub const ORIGIN_MSG: u8 = 0x46;

    pub const REPLICA_BEGIN: u8 = 0x61;
    pub const REPLICA_ERROR: u8 = 0x62;
    pub const REPLICA_END: u8 = 0x63;
    pub const REPLICA_HASH: u8 = 0x64;
    pub const REPLICA_READY: u8 = 0x65;
    pub const REPLICA_MSG: u8 = 0x66;
}

/// Which side of the conversation a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Holds the authoritative database.
    Origin,
    /// Is brought up to date with the origin.
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Origin => f.write_str("origin"),
            Self::Replica => f.write_str("replica"),
        }
    }
}

/// Messages sent from the origin to the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginMessage {
    /// Opens (or re-opens, after renegotiation) the conversation.
    Begin {
        version: u8,
        page_size: PageSize,
        page_count: u32,
    },
    /// No more messages follow.
    End,
    /// Error text to show to the user.
    Error(String),
    /// Full content of one page.
    Page { pgno: PageNumber, data: Bytes },
    /// Commit, leaving the replica with `page_count` pages.
    Txn { page_count: u32 },
    /// Informational text.
    Msg(String),
}

impl OriginMessage {
    /// The tag byte introducing this message.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Begin { .. } => tags::ORIGIN_BEGIN,
            Self::End => tags::ORIGIN_END,
            Self::Error(_) => tags::ORIGIN_ERROR,
            Self::Page { .. } => tags::ORIGIN_PAGE,
            Self::Txn { .. } => tags::ORIGIN_TXN,
            Self::Msg(_) => tags::ORIGIN_MSG,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "ORIGIN_BEGIN",
            Self::End => "ORIGIN_END",
            Self::Error(_) => "ORIGIN_ERROR",
            Self::Page { .. } => "ORIGIN_PAGE",
            Self::Txn { .. } => "ORIGIN_TXN",
            Self::Msg(_) => "ORIGIN_MSG",
        }
    }
}

/// Messages sent from the replica to the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaMessage {
    /// Counter-proposal of a lower protocol version.
    Begin { version: u8 },
    /// Error text to show to the user.
    Error(String),
    /// No more messages follow.
    End,
    /// Fingerprint of the next page, in ascending page order from page 1.
    Hash(Fingerprint),
    /// Every fingerprint the replica intends to send has been sent.
    Ready,
    /// Informational text.
    Msg(String),
}

impl ReplicaMessage {
    /// The tag byte introducing this message.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Begin { .. } => tags::REPLICA_BEGIN,
            Self::Error(_) => tags::REPLICA_ERROR,
            Self::End => tags::REPLICA_END,
            Self::Hash(_) => tags::REPLICA_HASH,
            Self::Ready => tags::REPLICA_READY,
            Self::Msg(_) => tags::REPLICA_MSG,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "REPLICA_BEGIN",
            Self::Error(_) => "REPLICA_ERROR",
            Self::End => "REPLICA_END",
            Self::Hash(_) => "REPLICA_HASH",
            Self::Ready => "REPLICA_READY",
            Self::Msg(_) => "REPLICA_MSG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_pair_by_case() {
        let origin = [
            OriginMessage::Begin {
                version: 1,
                page_size: PageSize::DEFAULT,
                page_count: 0,
            },
            OriginMessage::End,
            OriginMessage::Error(String::new()),
        ];
        let replica = [
            ReplicaMessage::Begin { version: 1 },
            ReplicaMessage::Error(String::new()),
            ReplicaMessage::End,
        ];
        for msg in &origin {
            assert!(msg.tag().is_ascii_uppercase(), "{}", msg.name());
        }
        for msg in &replica {
            assert!(msg.tag().is_ascii_lowercase(), "{}", msg.name());
        }
        assert_eq!(origin[0].tag().to_ascii_lowercase(), replica[0].tag());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Origin.to_string(), "origin");
        assert_eq!(Role::Replica.to_string(), "replica");
    }
}
