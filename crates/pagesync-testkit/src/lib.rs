//! # Pagesync Testkit
//!
//! Testing utilities for pagesync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: fingerprints of known inputs, fixed across platforms
//! - **Generators**: Proptest strategies for page images and endpoint names
//! - **Fixtures**: paired in-memory stores and on-disk SQLite databases
//!
//! ## Golden Vectors
//!
//! ```rust
//! use pagesync_testkit::vectors::verify_all_vectors;
//!
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use pagesync_core::PageSize;
//! use pagesync_testkit::fixtures::StorePair;
//!
//! // Ten-page origin, replica holding a copy with page 3 changed.
//! let pair = StorePair::new(PageSize::DEFAULT, 10)
//!     .with_replica_copy()
//!     .with_replica_page_changed(3);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{page_image, SqliteFixture, StorePair};
pub use generators::{divergent_pages, page_size, PagePlan};
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};
