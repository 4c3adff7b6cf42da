//! Origin state machine.
//!
//! The origin announces its geometry, collects the replica's page
//! fingerprints, and answers with the content of every page the replica
//! lacks or has wrong.
//!
//! ```text
//! Origin                              Replica
//!   |-------- BEGIN(v, size, n) ------>|
//!   |<------- BEGIN(v') ---------------|  only if v is too new
//!   |-------- BEGIN(v', size, n) ----->|
//!   |<------- HASH x min(n, m) --------|
//!   |<------- READY -------------------|
//!   |-------- PAGE x k --------------->|
//!   |-------- TXN(n) ----------------->|
//!   |-------- END -------------------->|
//! ```

use std::collections::BTreeSet;

use tokio::io::{AsyncRead, AsyncWrite};

use pagesync_core::{Fingerprint, PageNumber, PageSize};
use pagesync_store::{OpenMode, OpenStore, PageStore};

use crate::error::{Result, SyncError};
use crate::messages::{OriginMessage, ReplicaMessage};
use crate::session::Session;

struct OriginState<S> {
    store: S,
    page_size: PageSize,
    page_count: u32,
    version: u8,
    renegotiated: bool,
    /// Number of fingerprints received so far; the last one was for this
    /// page number.
    cursor: u32,
    /// Hashed pages whose fingerprint disagreed.
    stale: BTreeSet<u32>,
    /// A logical error was recorded: no page content will be sent.
    failed: bool,
}

/// Run the origin side of a session.
pub(crate) async fn run<O, R, W>(session: &mut Session<R, W>, opener: &O) -> Result<()>
where
    O: OpenStore,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut state = match open(session, opener).await {
        Ok(state) => state,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            session.report(&err).await?;
            return session.send_origin(&OriginMessage::End).await;
        }
    };

    let outcome = exchange(session, &mut state).await;
    let closed = state.store.close().await;
    outcome?;
    closed?;
    Ok(())
}

/// Open the database under a read transaction and announce it.
async fn open<O, R, W>(session: &mut Session<R, W>, opener: &O) -> Result<OriginState<O::Store>>
where
    O: OpenStore,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let store = opener.open(OpenMode::Origin).await.map_err(|e| {
        SyncError::Protocol(format!("cannot open origin \"{}\": {}", opener.describe(), e))
    })?;
    let (page_size, page_count) = match inspect(&store).await {
        Ok(geometry) => geometry,
        Err(err) => {
            let _ = store.close().await;
            return Err(err);
        }
    };

    let version = session.config().max_protocol_version;
    session.protocol_version = version;
    session.page_size = Some(page_size);
    session.page_count = page_count;
    tracing::debug!(version, %page_size, page_count, "origin opened");
    session
        .send_origin(&OriginMessage::Begin {
            version,
            page_size,
            page_count,
        })
        .await?;

    Ok(OriginState {
        store,
        page_size,
        page_count,
        version,
        renegotiated: false,
        cursor: 0,
        stale: BTreeSet::new(),
        failed: false,
    })
}

/// Start the read transaction and read the database geometry.
async fn inspect<S: PageStore>(store: &S) -> Result<(PageSize, u32)> {
    store.begin_read().await?;
    if !store.journal_mode().await?.is_wal() {
        return Err(SyncError::NotWal { side: "origin" });
    }
    let page_count = store.page_count().await?;
    let page_size = store.page_size().await?;
    Ok((page_size, page_count))
}

async fn exchange<S, R, W>(session: &mut Session<R, W>, state: &mut OriginState<S>) -> Result<()>
where
    S: PageStore,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let msg = match session.recv_replica().await {
            Ok(Some(msg)) => msg,
            // The replica exits once it has seen END.
            Ok(None) => return Ok(()),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                session.report(&err).await?;
                state.failed = true;
                continue;
            }
        };

        match msg {
            ReplicaMessage::End => return Ok(()),
            ReplicaMessage::Msg(text) => session.display_peer(false, text),
            ReplicaMessage::Error(text) => session.display_peer(true, text),
            ReplicaMessage::Begin { version } => {
                if state.renegotiated || version >= state.version {
                    let err = SyncError::Protocol(format!(
                        "replica cannot downgrade protocol version {} to {}",
                        state.version, version
                    ));
                    session.report(&err).await?;
                    return session.send_origin(&OriginMessage::End).await;
                }
                tracing::debug!(from = state.version, to = version, "protocol renegotiated");
                state.version = version;
                state.renegotiated = true;
                session.protocol_version = version;
                session
                    .send_origin(&OriginMessage::Begin {
                        version,
                        page_size: state.page_size,
                        page_count: state.page_count,
                    })
                    .await?;
            }
            ReplicaMessage::Hash(fp) => {
                state.cursor = state.cursor.saturating_add(1);
                session.hashes_sent += 1;
                if state.failed || state.cursor > state.page_count {
                    continue;
                }
                if let Err(err) = check_hash(state, fp).await {
                    session.report(&err).await?;
                    state.failed = true;
                }
            }
            ReplicaMessage::Ready => {
                if !state.failed {
                    send_pages(session, state).await?;
                }
                session.send_origin(&OriginMessage::End).await?;
            }
        }
    }
}

/// Compare the replica's fingerprint of the page at the cursor with ours.
async fn check_hash<S: PageStore>(state: &mut OriginState<S>, fp: Fingerprint) -> Result<()> {
    let pgno = PageNumber::new(state.cursor)?;
    let own = state.store.fingerprint_page(pgno).await?;
    if own != Some(fp) {
        tracing::trace!(pgno = state.cursor, "page differs");
        state.stale.insert(state.cursor);
    }
    Ok(())
}

/// Send every page in the working set, then `TXN`.
///
/// The working set is every hashed page that differed plus every page past
/// the hashed prefix, less the lock-byte page.
async fn send_pages<S, R, W>(session: &mut Session<R, W>, state: &mut OriginState<S>) -> Result<()>
where
    S: PageStore,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut working = std::mem::take(&mut state.stale);
    working.extend(state.cursor.saturating_add(1)..=state.page_count);
    if let Some(lock_page) = state.store.lock_byte_page(state.page_size) {
        working.remove(&lock_page.get());
    }
    tracing::debug!(
        hashed = state.cursor,
        pages = working.len(),
        "sending page content"
    );

    for pgno in working {
        let pgno = PageNumber::new(pgno)?;
        let data = match state.store.read_page(pgno).await {
            Ok(Some(data)) => data,
            Ok(None) => continue,
            Err(err) => {
                // Without TXN the replica discards what it has received.
                session.report(&SyncError::from(err)).await?;
                state.failed = true;
                return Ok(());
            }
        };
        session.send_origin(&OriginMessage::Page { pgno, data }).await?;
        session.pages_sent += 1;
    }

    session
        .send_origin(&OriginMessage::Txn {
            page_count: state.page_count,
        })
        .await
}
