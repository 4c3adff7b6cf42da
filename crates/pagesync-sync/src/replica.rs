//! Replica state machine.
//!
//! The replica is passive: it answers `BEGIN` with the fingerprints of the
//! pages it already has, applies whatever page content follows inside one
//! write transaction, and commits on `TXN`.

use tokio::io::{AsyncRead, AsyncWrite};

use pagesync_core::{PageNumber, PageSize};
use pagesync_store::{OpenMode, OpenStore, PageStore};

use crate::error::{Result, SyncError};
use crate::messages::{OriginMessage, ReplicaMessage};
use crate::session::Session;

struct ReplicaState<S> {
    store: Option<S>,
    /// A counter-proposal has already been sent.
    renegotiated: bool,
    /// The write transaction is open.
    in_txn: bool,
    /// A page failed to apply; the transaction will be rolled back.
    apply_failed: bool,
}

/// Run the replica side of a session.
pub(crate) async fn run<O, R, W>(session: &mut Session<R, W>, opener: &O) -> Result<()>
where
    O: OpenStore,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut state = ReplicaState {
        store: None,
        renegotiated: false,
        in_txn: false,
        apply_failed: false,
    };
    let outcome = exchange(session, opener, &mut state).await;
    if let Some(store) = state.store.take() {
        release(&store, state.in_txn).await;
    }
    outcome
}

/// Roll back anything unfinished and close the store. Failures here are
/// logged; the session's own outcome stands.
async fn release<S: PageStore>(store: &S, in_txn: bool) {
    if in_txn {
        tracing::warn!("rolling back unfinished replica transaction");
        if let Err(err) = store.rollback().await {
            tracing::warn!(error = %err, "replica rollback failed");
        }
    }
    if let Err(err) = store.close().await {
        tracing::warn!(error = %err, "closing replica failed");
    }
}

async fn exchange<O, R, W>(
    session: &mut Session<R, W>,
    opener: &O,
    state: &mut ReplicaState<O::Store>,
) -> Result<()>
where
    O: OpenStore,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let msg = match session.recv_origin().await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                if state.in_txn {
                    return Err(SyncError::Protocol(
                        "origin closed the connection before the transaction completed".into(),
                    ));
                }
                return Ok(());
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) if state.store.is_none() => {
                // Nothing has been opened yet: tell the origin to stop.
                session.report(&err).await?;
                return session.send_replica(&ReplicaMessage::End).await;
            }
            Err(err) => {
                session.report(&err).await?;
                state.apply_failed = true;
                continue;
            }
        };

        match msg {
            OriginMessage::End => return Ok(()),
            OriginMessage::Msg(text) => session.display_peer(false, text),
            OriginMessage::Error(text) => session.display_peer(true, text),
            OriginMessage::Begin {
                version,
                page_size,
                page_count,
            } => {
                if state.store.is_some() {
                    session
                        .report(&SyncError::Protocol("unexpected ORIGIN_BEGIN".into()))
                        .await?;
                    state.apply_failed = true;
                    continue;
                }
                match begin(session, opener, state, version, page_size, page_count).await {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        session.report(&err).await?;
                        if let Some(store) = state.store.take() {
                            release(&store, state.in_txn).await;
                            state.in_txn = false;
                        }
                        return session.send_replica(&ReplicaMessage::End).await;
                    }
                }
            }
            OriginMessage::Page { pgno, data } => {
                session.pages_sent += 1;
                let Some(store) = state.store.as_ref().filter(|_| state.in_txn) else {
                    session
                        .report(&SyncError::Protocol(format!(
                            "page {pgno} received outside of a transaction"
                        )))
                        .await?;
                    continue;
                };
                if state.apply_failed {
                    continue;
                }
                if let Err(err) = store.write_page(pgno, data).await {
                    session
                        .report_error(format!("cannot write page {pgno}: {err}"))
                        .await?;
                    state.apply_failed = true;
                }
            }
            OriginMessage::Txn { page_count } => {
                let Some(store) = state.store.as_ref().filter(|_| state.in_txn) else {
                    session
                        .report(&SyncError::Protocol("unexpected ORIGIN_TXN".into()))
                        .await?;
                    continue;
                };
                state.in_txn = false;
                if state.apply_failed {
                    tracing::warn!("discarding received pages after an error");
                    if let Err(err) = store.rollback().await {
                        tracing::warn!(error = %err, "replica rollback failed");
                    }
                    continue;
                }
                match commit(store, page_count).await {
                    Ok(()) => {
                        session.page_count = page_count;
                        tracing::debug!(page_count, "replica committed");
                    }
                    Err(err) => {
                        if let Err(e) = store.rollback().await {
                            tracing::warn!(error = %e, "replica rollback failed");
                        }
                        session.report(&err).await?;
                    }
                }
            }
        }
    }
}

/// Handle `BEGIN`: renegotiate or open the database and send fingerprints.
async fn begin<O, R, W>(
    session: &mut Session<R, W>,
    opener: &O,
    state: &mut ReplicaState<O::Store>,
    version: u8,
    page_size: PageSize,
    page_count: u32,
) -> Result<()>
where
    O: OpenStore,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let supported = session.config().max_protocol_version;
    if version > supported {
        if state.renegotiated {
            return Err(SyncError::UnsupportedVersion(version));
        }
        tracing::debug!(offered = version, supported, "asking origin to downgrade");
        state.renegotiated = true;
        session
            .send_replica(&ReplicaMessage::Begin { version: supported })
            .await?;
        return Ok(());
    }
    session.protocol_version = version;
    session.page_size = Some(page_size);
    session.page_count = page_count;

    let store = opener.open(OpenMode::Replica).await.map_err(|e| {
        SyncError::Protocol(format!("cannot open replica \"{}\": {}", opener.describe(), e))
    })?;
    let store = state.store.insert(store);
    let existing = store.page_count().await?;
    if existing == 0 {
        store.initialize(page_size).await?;
    }
    store.begin_write().await?;
    state.in_txn = true;
    if !store.journal_mode().await?.is_wal() {
        return Err(SyncError::NotWal { side: "replica" });
    }
    let local_size = store.page_size().await?;
    if local_size != page_size {
        return Err(SyncError::PageSizeMismatch {
            origin: page_size.get(),
            replica: local_size.get(),
        });
    }

    // A database created just now holds only its own blank header, which
    // the origin's page 1 replaces anyway.
    let local_count = if existing == 0 {
        0
    } else {
        store.page_count().await?
    };
    let hashed = local_count.min(page_count);
    tracing::debug!(local_count, hashed, "sending page hashes");
    for pgno in PageNumber::range_to(hashed) {
        let Some(fp) = store.fingerprint_page(pgno).await? else {
            return Err(SyncError::Protocol(format!("replica page {pgno} is missing")));
        };
        session.send_replica(&ReplicaMessage::Hash(fp)).await?;
        session.hashes_sent += 1;
    }
    session.send_replica(&ReplicaMessage::Ready).await
}

/// Shrink to the origin's page count if needed, then commit.
async fn commit<S: PageStore>(store: &S, page_count: u32) -> Result<()> {
    let local_count = store.page_count().await?;
    if page_count < local_count {
        tracing::debug!(from = local_count, to = page_count, "truncating replica");
        store.truncate(page_count).await?;
    }
    store.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireWriter;
    use crate::messages::Role;
    use crate::session::SyncConfig;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pagesync_core::Fingerprint;
    use pagesync_store::{JournalMode, MemoryPageStore, StoreError};

    /// A memory store that cannot be rolled back or closed cleanly.
    #[derive(Clone)]
    struct StuckStore(MemoryPageStore);

    #[async_trait]
    impl PageStore for StuckStore {
        async fn page_size(&self) -> pagesync_store::Result<PageSize> {
            self.0.page_size().await
        }
        async fn page_count(&self) -> pagesync_store::Result<u32> {
            self.0.page_count().await
        }
        async fn journal_mode(&self) -> pagesync_store::Result<JournalMode> {
            self.0.journal_mode().await
        }
        async fn initialize(&self, page_size: PageSize) -> pagesync_store::Result<()> {
            self.0.initialize(page_size).await
        }
        fn lock_byte_page(&self, page_size: PageSize) -> Option<PageNumber> {
            self.0.lock_byte_page(page_size)
        }
        async fn begin_read(&self) -> pagesync_store::Result<()> {
            self.0.begin_read().await
        }
        async fn begin_write(&self) -> pagesync_store::Result<()> {
            self.0.begin_write().await
        }
        async fn commit(&self) -> pagesync_store::Result<()> {
            self.0.commit().await
        }
        async fn rollback(&self) -> pagesync_store::Result<()> {
            self.0.rollback().await?;
            Err(StoreError::Transaction("rollback stuck".into()))
        }
        async fn read_page(&self, pgno: PageNumber) -> pagesync_store::Result<Option<Bytes>> {
            self.0.read_page(pgno).await
        }
        async fn write_page(&self, pgno: PageNumber, data: Bytes) -> pagesync_store::Result<()> {
            self.0.write_page(pgno, data).await
        }
        async fn truncate(&self, page_count: u32) -> pagesync_store::Result<()> {
            self.0.truncate(page_count).await
        }
        async fn fingerprint_page(
            &self,
            pgno: PageNumber,
        ) -> pagesync_store::Result<Option<Fingerprint>> {
            self.0.fingerprint_page(pgno).await
        }
        async fn close(&self) -> pagesync_store::Result<()> {
            self.0.close().await?;
            Err(StoreError::Transaction("close stuck".into()))
        }
    }

    #[async_trait]
    impl OpenStore for StuckStore {
        type Store = StuckStore;

        async fn open(&self, _mode: OpenMode) -> pagesync_store::Result<Self::Store> {
            Ok(self.clone())
        }

        fn describe(&self) -> String {
            "stuck".to_string()
        }
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_session_error() {
        let page_size = PageSize::new(512).unwrap();
        let mut writer = WireWriter::new(Vec::new());
        writer
            .write_origin_message(&OriginMessage::Begin {
                version: 1,
                page_size,
                page_count: 3,
            })
            .await
            .unwrap();
        writer
            .write_origin_message(&OriginMessage::Page {
                pgno: PageNumber::FIRST,
                data: Bytes::from(vec![7u8; 512]),
            })
            .await
            .unwrap();
        writer.flush().await.unwrap();
        let script = writer.into_inner();

        let dir = tempfile::tempdir().unwrap();
        let error_file = dir.path().join("errors.txt");
        let config = SyncConfig {
            error_file: Some(error_file.clone()),
            ..SyncConfig::default()
        };
        let pages = MemoryPageStore::with_pages(page_size, vec![vec![1u8; 512]; 2]);
        let session = Session::new(Role::Replica, script.as_slice(), tokio::io::sink(), config);
        let report = session.run(&StuckStore(pages.clone())).await;

        assert_eq!(report.errors, 1);
        let logged = std::fs::read_to_string(&error_file).unwrap();
        assert!(
            logged.contains("origin closed the connection before the transaction completed"),
            "{logged}"
        );
        assert!(!logged.contains("stuck"), "{logged}");
        assert_eq!(pages.pages().unwrap(), vec![Bytes::from(vec![1u8; 512]); 2]);
    }
}
