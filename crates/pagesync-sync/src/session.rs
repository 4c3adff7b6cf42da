//! Session context: everything one sync run needs, owned in one place.
//!
//! A [`Session`] owns both halves of the peer connection, the negotiated
//! protocol state, and the traffic and error counters. The origin and
//! replica state machines borrow it mutably for the duration of the run,
//! and [`Session::run`] turns it into a [`SyncReport`] at the end.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};

use pagesync_core::PageSize;
use pagesync_store::OpenStore;

use crate::codec::{WireReader, WireWriter};
use crate::error::{Result, SyncError};
use crate::messages::{OriginMessage, ReplicaMessage, Role, PROTOCOL_VERSION};
use crate::{origin, replica};

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Highest protocol version to propose (origin) or accept (replica).
    pub max_protocol_version: u8,
    /// Only exchange informational messages; do not touch any database.
    pub comm_check: bool,
    /// Every error message is appended to this file.
    pub error_file: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_protocol_version: PROTOCOL_VERSION,
            comm_check: false,
            error_file: None,
        }
    }
}

/// Result of a sync session.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// The side this process played.
    pub role: Role,
    /// Protocol version in effect at the end of the session.
    pub protocol_version: u8,
    /// Page size of the origin database, once known.
    pub page_size: Option<PageSize>,
    /// Page count of the origin database, once known.
    pub page_count: u32,
    /// Bytes written to the peer.
    pub bytes_sent: u64,
    /// Bytes read from the peer.
    pub bytes_received: u64,
    /// Page fingerprints sent by the replica.
    pub hashes_sent: u64,
    /// Page contents sent by the origin.
    pub pages_sent: u64,
    /// Errors recorded on this side, including write errors.
    pub errors: u32,
    /// Failed writes to the peer.
    pub write_errors: u32,
    /// Text received in peer `MSG`/`ERROR` messages and local notices, in
    /// order. Peer errors carry an `ERROR: ` prefix.
    pub messages: Vec<String>,
    /// Wall-clock duration of the session.
    pub elapsed: Duration,
}

impl SyncReport {
    /// Whether the session completed without errors.
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }

    /// Size of the origin database in bytes.
    pub fn total_size(&self) -> u64 {
        u64::from(self.page_count) * self.page_size.map_or(0, |s| u64::from(s.get()))
    }

    /// Process exit status: the error count, saturated.
    pub fn exit_code(&self) -> u8 {
        u8::try_from(self.errors).unwrap_or(u8::MAX)
    }
}

/// Shared state for one synchronization run.
pub struct Session<R, W> {
    role: Role,
    is_remote: bool,
    config: SyncConfig,
    origin_name: String,
    replica_name: String,
    reader: WireReader<R>,
    writer: WireWriter<W>,
    pub(crate) protocol_version: u8,
    pub(crate) page_size: Option<PageSize>,
    pub(crate) page_count: u32,
    pub(crate) hashes_sent: u64,
    pub(crate) pages_sent: u64,
    errors: u32,
    write_errors: u32,
    messages: Vec<String>,
    started: Instant,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a session that reads the peer from `reader` and writes to
    /// `writer`.
    pub fn new(role: Role, reader: R, writer: W, config: SyncConfig) -> Self {
        Self {
            role,
            is_remote: false,
            protocol_version: config.max_protocol_version,
            config,
            origin_name: String::new(),
            replica_name: String::new(),
            reader: WireReader::new(reader),
            writer: WireWriter::new(writer),
            page_size: None,
            page_count: 0,
            hashes_sent: 0,
            pages_sent: 0,
            errors: 0,
            write_errors: 0,
            messages: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Mark this side as a spawned peer. Its errors then travel to the
    /// other side as `ERROR` messages instead of being logged here.
    pub fn remote(mut self, is_remote: bool) -> Self {
        self.is_remote = is_remote;
        self
    }

    /// Names of the two endpoints, for diagnostics.
    pub fn with_names(mut self, origin: impl Into<String>, replica: impl Into<String>) -> Self {
        self.origin_name = origin.into();
        self.replica_name = replica.into();
        self
    }

    /// Copy all outgoing traffic to `mirror`.
    pub fn with_mirror(mut self, mirror: Box<dyn Write + Send>) -> Self {
        self.writer.set_mirror(mirror);
        self
    }

    /// The side this session plays.
    pub fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Errors recorded so far.
    pub fn errors(&self) -> u32 {
        self.errors
    }

    /// Run this side of the protocol against the database opened by
    /// `opener`, then close the connection.
    pub async fn run<O: OpenStore>(mut self, opener: &O) -> SyncReport {
        tracing::debug!(
            role = %self.role,
            remote = self.is_remote,
            store = %opener.describe(),
            "session starting"
        );
        let outcome = if self.config.comm_check {
            self.comm_check().await
        } else {
            match self.role {
                Role::Origin => origin::run(&mut self, opener).await,
                Role::Replica => replica::run(&mut self, opener).await,
            }
        };
        if let Err(err) = outcome {
            // A failed write has already been recorded.
            if !matches!(err, SyncError::Write(_)) {
                let _ = self.report_error(err.to_string()).await;
            }
        }
        if self.write_errors == 0 {
            if let Err(err) = self.writer.shutdown().await {
                self.record_write_error(&err);
            }
        }
        self.into_report()
    }

    fn into_report(self) -> SyncReport {
        let report = SyncReport {
            role: self.role,
            protocol_version: self.protocol_version,
            page_size: self.page_size,
            page_count: self.page_count,
            bytes_sent: self.writer.bytes_sent(),
            bytes_received: self.reader.bytes_received(),
            hashes_sent: self.hashes_sent,
            pages_sent: self.pages_sent,
            errors: self.errors,
            write_errors: self.write_errors,
            messages: self.messages,
            elapsed: self.started.elapsed(),
        };
        tracing::info!(
            role = %report.role,
            sent = report.bytes_sent,
            received = report.bytes_received,
            hashes = report.hashes_sent,
            pages = report.pages_sent,
            errors = report.errors,
            "session finished"
        );
        report
    }

    /// Exchange informational messages only, then end the conversation.
    async fn comm_check(&mut self) -> Result<()> {
        let text = format!(
            "{} origin={:?} replica={:?} remote={} protocol={}",
            self.role,
            self.origin_name,
            self.replica_name,
            self.is_remote,
            self.config.max_protocol_version
        );
        self.info(text).await?;
        match self.role {
            Role::Origin => {
                self.send_origin(&OriginMessage::End).await?;
                while let Some(msg) = self.recv_replica().await? {
                    match msg {
                        ReplicaMessage::End => break,
                        ReplicaMessage::Msg(text) => self.display_peer(false, text),
                        ReplicaMessage::Error(text) => self.display_peer(true, text),
                        other => {
                            return Err(SyncError::Protocol(format!(
                                "unexpected {} during communication check",
                                other.name()
                            )))
                        }
                    }
                }
            }
            Role::Replica => {
                self.send_replica(&ReplicaMessage::End).await?;
                while let Some(msg) = self.recv_origin().await? {
                    match msg {
                        OriginMessage::End => break,
                        OriginMessage::Msg(text) => self.display_peer(false, text),
                        OriginMessage::Error(text) => self.display_peer(true, text),
                        other => {
                            return Err(SyncError::Protocol(format!(
                                "unexpected {} during communication check",
                                other.name()
                            )))
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messaging
    // ─────────────────────────────────────────────────────────────────────────

    fn record_write_error(&mut self, err: &SyncError) {
        self.write_errors += 1;
        self.log_error(&err.to_string());
        tracing::error!(error = %err, "write to peer failed");
    }

    pub(crate) async fn send_origin(&mut self, msg: &OriginMessage) -> Result<()> {
        tracing::trace!(msg = msg.name(), "send");
        if let Err(err) = self.writer.write_origin_message(msg).await {
            self.record_write_error(&err);
            return Err(err);
        }
        Ok(())
    }

    pub(crate) async fn send_replica(&mut self, msg: &ReplicaMessage) -> Result<()> {
        tracing::trace!(msg = msg.name(), "send");
        if let Err(err) = self.writer.write_replica_message(msg).await {
            self.record_write_error(&err);
            return Err(err);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Err(err) = self.writer.flush().await {
            self.record_write_error(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Receive the next message from an origin peer.
    ///
    /// Anything still buffered for the peer is flushed first, so the peer is
    /// never left waiting on bytes this side has already produced.
    pub(crate) async fn recv_origin(&mut self) -> Result<Option<OriginMessage>> {
        self.flush().await?;
        let msg = self.reader.read_origin_message(self.page_size).await?;
        if let Some(msg) = &msg {
            tracing::trace!(msg = msg.name(), "recv");
        }
        Ok(msg)
    }

    /// Receive the next message from a replica peer.
    pub(crate) async fn recv_replica(&mut self) -> Result<Option<ReplicaMessage>> {
        self.flush().await?;
        let msg = self.reader.read_replica_message().await?;
        if let Some(msg) = &msg {
            tracing::trace!(msg = msg.name(), "recv");
        }
        Ok(msg)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Diagnostics
    // ─────────────────────────────────────────────────────────────────────────

    /// Count an error and append it to the error file.
    fn log_error(&mut self, text: &str) {
        self.errors += 1;
        let Some(path) = &self.config.error_file else {
            return;
        };
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{text}"));
        if let Err(e) = appended {
            tracing::warn!(path = %path.display(), error = %e, "cannot append to error file");
        }
    }

    /// Record a logical error on this side.
    ///
    /// A spawned peer sends it to the other side; a local side logs it.
    /// Fails only if the error message itself cannot be written. That
    /// failure counts as a write error but not as a second error.
    pub(crate) async fn report_error(&mut self, text: String) -> Result<()> {
        self.log_error(&text);
        if !self.is_remote {
            tracing::error!("{}", text);
            return Ok(());
        }
        let sent = match self.role {
            Role::Origin => {
                self.writer
                    .write_origin_message(&OriginMessage::Error(text))
                    .await
            }
            Role::Replica => {
                self.writer
                    .write_replica_message(&ReplicaMessage::Error(text))
                    .await
            }
        };
        let delivered = match sent {
            Ok(()) => self.writer.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = &delivered {
            self.write_errors += 1;
            tracing::error!(error = %err, "cannot deliver error report to peer");
        }
        delivered
    }

    /// Report a logical error as a [`SyncError`].
    pub(crate) async fn report(&mut self, err: &SyncError) -> Result<()> {
        self.report_error(err.to_string()).await
    }

    /// Emit an informational notice.
    pub(crate) async fn info(&mut self, text: String) -> Result<()> {
        if self.is_remote {
            match self.role {
                Role::Origin => self.send_origin(&OriginMessage::Msg(text)).await?,
                Role::Replica => self.send_replica(&ReplicaMessage::Msg(text)).await?,
            }
            self.flush().await
        } else {
            tracing::info!("{}", text);
            self.messages.push(text);
            Ok(())
        }
    }

    /// Show text received in a peer `MSG` or `ERROR` message.
    pub(crate) fn display_peer(&mut self, is_error: bool, text: String) {
        let text = if text.is_empty() {
            "ERROR: unknown (possibly out-of-memory)".to_string()
        } else if is_error {
            format!("ERROR: {text}")
        } else {
            text
        };
        if is_error {
            tracing::error!(peer = true, "{}", text);
            self.log_error(&text);
        } else {
            tracing::info!(peer = true, "{}", text);
        }
        self.messages.push(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesync_store::MemoryPageStore;
    use tokio::io::duplex;

    #[test]
    fn test_report_exit_code_saturates() {
        let mut report = SyncReport {
            role: Role::Origin,
            protocol_version: 1,
            page_size: Some(PageSize::DEFAULT),
            page_count: 10,
            bytes_sent: 0,
            bytes_received: 0,
            hashes_sent: 0,
            pages_sent: 0,
            errors: 0,
            write_errors: 0,
            messages: Vec::new(),
            elapsed: Duration::ZERO,
        };
        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.total_size(), 40960);
        report.errors = 1000;
        assert_eq!(report.exit_code(), 255);
    }

    #[tokio::test]
    async fn test_comm_check_exchanges_messages() {
        let (a, b) = duplex(4096);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let config = SyncConfig {
            comm_check: true,
            ..SyncConfig::default()
        };

        let origin = Session::new(Role::Origin, a_read, a_write, config.clone())
            .with_names("a.db", "b.db");
        let replica = Session::new(Role::Replica, b_read, b_write, config)
            .with_names("a.db", "b.db")
            .remote(true);
        let store = MemoryPageStore::new();
        let (origin_report, replica_report) =
            tokio::join!(origin.run(&store), replica.run(&store));

        assert!(origin_report.is_success());
        assert!(replica_report.is_success());
        assert_eq!(origin_report.messages.len(), 2);
        assert!(origin_report.messages[0].starts_with("origin origin=\"a.db\""));
        assert!(origin_report.messages[1].starts_with("replica origin=\"a.db\""));
        assert!(origin_report.messages[1].contains("remote=true"));
    }

    #[tokio::test]
    async fn test_error_file_records_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.txt");
        let (a, _b) = duplex(64);
        let (read, write) = tokio::io::split(a);
        let config = SyncConfig {
            error_file: Some(path.clone()),
            ..SyncConfig::default()
        };
        let mut session = Session::new(Role::Origin, read, write, config);
        session.report_error("first".into()).await.unwrap();
        session.display_peer(true, "second".into());
        session.display_peer(false, "note".into());
        assert_eq!(session.errors(), 2);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "first\nERROR: second\n");
    }

    #[tokio::test]
    async fn test_undeliverable_error_counts_once() {
        let (a, b) = duplex(64);
        drop(b);
        let (read, write) = tokio::io::split(a);
        let mut session =
            Session::new(Role::Replica, read, write, SyncConfig::default()).remote(true);
        assert!(session.report_error("cannot write page 3".into()).await.is_err());
        assert_eq!(session.errors(), 1);
        assert_eq!(session.write_errors, 1);

        let report = session.into_report();
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_empty_peer_error_text() {
        let (a, _b) = duplex(64);
        let (read, write) = tokio::io::split(a);
        let mut session = Session::new(Role::Replica, read, write, SyncConfig::default());
        session.display_peer(true, String::new());
        assert_eq!(session.messages, vec!["ERROR: unknown (possibly out-of-memory)"]);
    }
}
