//! # Pagesync
//!
//! Bring a replica SQLite database up to date with a live origin database,
//! on the same machine or across an ssh connection, transferring only the
//! pages that differ.
//!
//! ## Overview
//!
//! - **Origin**: the database holding current content, in WAL mode. It may
//!   be read and written by other processes throughout the sync.
//! - **Replica**: the database being updated. It is created if missing and
//!   receives all changes in one transaction.
//! - **Endpoints**: a local path or `[user@]host:path`; at most one of the
//!   two may be remote.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pagesync::{Orchestrator, OrchestratorConfig};
//!
//! async fn example() -> pagesync::Result<()> {
//!     let orchestrator = Orchestrator::new(OrchestratorConfig::default());
//!     let report = orchestrator.sync("live.db", "backup:/srv/live.db").await?;
//!     for line in pagesync::report::summary_lines(&report) {
//!         println!("{line}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `pagesync::core` - Fingerprints and page geometry
//! - `pagesync::store` - Page store abstraction and SQLite
//! - `pagesync::sync` - Wire protocol and session state machines

pub mod endpoint;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod shell;

// Re-export component crates
pub use pagesync_core as core;
pub use pagesync_store as store;
pub use pagesync_sync as sync;

pub use endpoint::Endpoint;
pub use error::{PagesyncError, Result};
pub use orchestrator::{plan, run_peer, Orchestrator, OrchestratorConfig, Plan, Topology};
pub use report::{summary_lines, NOT_SYNCED};
pub use shell::{escape_arg, CommandBuilder, ShellFlavor};

// Re-export commonly used types
pub use pagesync_sync::{Role, SyncConfig, SyncReport, PROTOCOL_VERSION};
