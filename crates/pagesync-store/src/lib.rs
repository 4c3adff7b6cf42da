//! # Pagesync Store
//!
//! Page store abstraction for pagesync. The sync engine only ever sees a
//! database as a sequence of fixed-size pages behind the [`PageStore`] trait,
//! with [`SqlitePageStore`] as the real backend and [`MemoryPageStore`] for
//! tests.
//!
//! ## Key Types
//!
//! - [`PageStore`] - Async page-level access with transaction control
//! - [`OpenStore`] - Opens a store in the origin or replica role
//! - [`SqlitePageStore`] - SQLite pages through the `sqlite_dbpage` table
//! - [`MemoryPageStore`] - In-memory pages for tests
//! - [`JournalMode`] - The store's consistency mode
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pagesync_store::{OpenMode, OpenStore, PageStore, SqliteOpener};
//!
//! async fn example() {
//!     let opener = SqliteOpener::new("origin.db");
//!     let store = opener.open(OpenMode::Origin).await.unwrap();
//!     store.begin_read().await.unwrap();
//!     let pages = store.page_count().await.unwrap();
//!     println!("{} pages", pages);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **1-based pages**: page numbers are [`pagesync_core::PageNumber`]s
//! - **Truncate on write**: shrinking a file is a write at `count + 1`
//! - **Lock-byte page**: every store reports which page, if any, must never
//!   be compared or transferred

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryPageStore;
pub use sqlite::{SqliteOpener, SqlitePageStore, SqliteStoreConfig};
pub use traits::{JournalMode, OpenMode, OpenStore, PageStore};
