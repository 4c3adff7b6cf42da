//! # Pagesync Core
//!
//! Pure primitives for pagesync: page fingerprints and page geometry.
//!
//! This crate contains no I/O, no storage, no process handling. It is pure
//! computation over page images.
//!
//! ## Key Types
//!
//! - [`Fingerprint`] - 20-byte digest of one page, compared against a peer
//! - [`Hasher`] - Streaming form of the reduced-round sponge hash
//! - [`PageSize`] - A validated power-of-two page size
//! - [`PageNumber`] - A 1-based page index
//!
//! ## Fingerprints
//!
//! The fingerprint is a SHA3-style sponge cut down to 6 rounds and a 160-bit
//! output. It detects accidental differences between two copies of a page; it
//! is not a cryptographic hash. See the [`hash`] module.

pub mod error;
pub mod hash;
pub mod types;

pub use error::{CoreError, Result};
pub use hash::{fingerprint, Fingerprint, Hasher, FINGERPRINT_LEN};
pub use types::{PageNumber, PageSize};
