//! # Pagesync Sync
//!
//! Wire protocol for bringing a replica database up to date with an origin.
//!
//! ## Overview
//!
//! Two processes, one per database, talk over a pair of byte streams. The
//! replica sends a fingerprint of every page it already has; the origin
//! answers with the content of every page that is missing or different,
//! then tells the replica how many pages the database has in total. Only
//! the origin's content is authoritative.
//!
//! ## Key Properties
//!
//! - **Idempotent**: a second sync with no intervening writes sends no pages
//! - **Ordered**: hashes and pages travel in ascending page order
//! - **Lock-step**: each side waits for the other; there are no timeouts
//! - **Atomic on the replica**: pages are applied in one write transaction
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pagesync_store::SqliteOpener;
//! use pagesync_sync::{Role, Session, SyncConfig};
//!
//! async fn example() {
//!     let opener = SqliteOpener::new("replica.db");
//!     let session = Session::new(
//!         Role::Replica,
//!         tokio::io::stdin(),
//!         tokio::io::stdout(),
//!         SyncConfig::default(),
//!     )
//!     .remote(true);
//!     let report = session.run(&opener).await;
//!     std::process::exit(i32::from(report.exit_code()));
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Origin                              Replica
//!   |-------- BEGIN ------------------>|
//!   |<------- HASH ... ----------------|
//!   |<------- READY -------------------|
//!   |-------- PAGE ... --------------->|
//!   |-------- TXN -------------------->|
//!   |-------- END -------------------->|
//! ```

pub mod codec;
pub mod convergence;
pub mod error;
pub mod messages;
mod origin;
mod replica;
pub mod session;
pub mod transport;

pub use codec::{WireReader, WireWriter};
pub use convergence::{verify_convergence, ConvergenceResult};
pub use error::{Result, SyncError};
pub use messages::{tags, OriginMessage, ReplicaMessage, Role, PROTOCOL_VERSION};
pub use session::{Session, SyncConfig, SyncReport};
pub use transport::{Launch, PeerChannel, PeerInvocation, PeerProcess, ProcessSpawner, Spawner};
