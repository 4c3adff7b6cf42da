//! Transport abstraction: starting the peer process.
//!
//! The protocol only needs a byte stream in each direction. A [`Spawner`]
//! turns a [`Launch`] description into a [`PeerChannel`] holding those
//! streams plus a handle to wait on. [`ProcessSpawner`] runs a real child
//! process; tests substitute spawners that run the peer in-process.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::error::{Result, SyncError};
use crate::messages::Role;

/// What the spawned peer is asked to do, independent of how it is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInvocation {
    /// Role the peer plays.
    pub role: Role,
    /// Origin endpoint as the peer should see it.
    pub origin: String,
    /// Replica endpoint as the peer should see it.
    pub replica: String,
    /// Run a communication check only.
    pub comm_check: bool,
    /// Error file on the peer's side.
    pub error_file: Option<String>,
}

/// A fully rendered command for starting the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    /// Program to execute.
    pub program: String,
    /// Arguments, passed without any shell interpretation.
    pub args: Vec<String>,
    /// Human-readable command line for diagnostics.
    pub display: String,
    /// The request encoded by `program` and `args`.
    pub invocation: PeerInvocation,
}

/// A running peer.
#[async_trait]
pub trait PeerProcess: Send {
    /// Wait for the peer to exit. Returns its exit code, if it has one.
    async fn wait(&mut self) -> Result<Option<i32>>;
}

/// Both directions of a connection to a running peer.
pub struct PeerChannel {
    /// The peer's output.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// The peer's input.
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Handle for waiting on the peer.
    pub process: Box<dyn PeerProcess>,
}

/// Starts peers.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Start the peer described by `launch`.
    async fn spawn(&self, launch: &Launch) -> Result<PeerChannel>;
}

/// Starts the peer as a child process with piped stdin and stdout.
///
/// The child's stderr is inherited so its diagnostics reach the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn spawn(&self, launch: &Launch) -> Result<PeerChannel> {
        let mut child = Command::new(&launch.program)
            .args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SyncError::Spawn(format!("{}: {}", launch.display, e)))?;
        let writer = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::Spawn(format!("{}: no stdin", launch.display)))?;
        let reader = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Spawn(format!("{}: no stdout", launch.display)))?;
        tracing::debug!(command = %launch.display, pid = child.id(), "spawned peer");
        Ok(PeerChannel {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: Box::new(ChildProcess(child)),
        })
    }
}

struct ChildProcess(Child);

#[async_trait]
impl PeerProcess for ChildProcess {
    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.0.wait().await?;
        Ok(status.code())
    }
}
