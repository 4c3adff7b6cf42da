//! Wire codec: typed reads and writes over the peer's byte streams.
//!
//! Integers are 32-bit big-endian, page sizes travel as their base-2
//! logarithm in one byte, and text is a length-prefixed UTF-8 string.
//! Both halves count the bytes they move so a session can report traffic.

use std::io::Write;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use pagesync_core::{Fingerprint, PageNumber, PageSize, FINGERPRINT_LEN};

use crate::error::{Result, SyncError};
use crate::messages::{tags, OriginMessage, ReplicaMessage};

/// Longest `ERROR`/`MSG` text accepted from a peer.
pub const MAX_TEXT_LEN: u32 = 1 << 20;

/// Reading half of a peer connection.
pub struct WireReader<R> {
    inner: BufReader<R>,
    received: u64,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            received: 0,
        }
    }

    /// Bytes read so far.
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Read one byte. End of input is `None`, not an error.
    pub async fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.inner.read(&mut byte).await? {
            0 => Ok(None),
            _ => {
                self.received += 1;
                Ok(Some(byte[0]))
            }
        }
    }

    async fn fill(&mut self, buf: &mut [u8], what: &'static str) -> Result<()> {
        match self.inner.read_exact(buf).await {
            Ok(_) => {
                self.received += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(SyncError::ShortRead { what })
            }
            Err(e) => Err(SyncError::Io(e)),
        }
    }

    async fn read_u8(&mut self, what: &'static str) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.fill(&mut byte, what).await?;
        Ok(byte[0])
    }

    /// Read a big-endian `u32`.
    pub async fn read_u32(&mut self, what: &'static str) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, what).await?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a page size sent as its base-2 logarithm.
    pub async fn read_pow2(&mut self) -> Result<PageSize> {
        let exponent = self.read_u8("page size").await?;
        Ok(PageSize::from_log2(exponent)?)
    }

    /// Read exactly `len` bytes.
    pub async fn read_bytes(&mut self, len: usize, what: &'static str) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(len);
        self.fill(&mut buf, what).await?;
        Ok(buf.freeze())
    }

    /// Read a length-prefixed string. Invalid UTF-8 is replaced, not rejected.
    pub async fn read_text(&mut self) -> Result<String> {
        let len = self.read_u32("message length").await?;
        if len > MAX_TEXT_LEN {
            return Err(SyncError::Framing(format!("{len}-byte message text")));
        }
        let data = self.read_bytes(len as usize, "message text").await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    fn unknown(&self, tag: u8) -> SyncError {
        SyncError::UnknownMessage {
            tag,
            offset: self.received,
        }
    }

    /// Read the next message sent by an origin.
    ///
    /// `page_size` is the size announced by the last `ORIGIN_BEGIN`; a page
    /// cannot be framed without it.
    pub async fn read_origin_message(
        &mut self,
        page_size: Option<PageSize>,
    ) -> Result<Option<OriginMessage>> {
        let Some(tag) = self.read_byte().await? else {
            return Ok(None);
        };
        let msg = match tag {
            tags::ORIGIN_BEGIN => {
                let version = self.read_u8("protocol version").await?;
                let exponent = self.read_u8("page size").await?;
                let page_count = self.read_u32("page count").await?;
                // The whole payload is consumed before validation so that a
                // bad page size leaves the stream in sync.
                OriginMessage::Begin {
                    version,
                    page_size: PageSize::from_log2(exponent)?,
                    page_count,
                }
            }
            tags::ORIGIN_END => OriginMessage::End,
            tags::ORIGIN_ERROR => OriginMessage::Error(self.read_text().await?),
            tags::ORIGIN_MSG => OriginMessage::Msg(self.read_text().await?),
            tags::ORIGIN_PAGE => {
                let page_size = page_size
                    .ok_or_else(|| SyncError::Framing("page content before BEGIN".into()))?;
                let pgno = self.read_u32("page number").await?;
                let data = self.read_bytes(page_size.bytes(), "page content").await?;
                OriginMessage::Page {
                    pgno: PageNumber::new(pgno)?,
                    data,
                }
            }
            tags::ORIGIN_TXN => OriginMessage::Txn {
                page_count: self.read_u32("page count").await?,
            },
            other => return Err(self.unknown(other)),
        };
        Ok(Some(msg))
    }

    /// Read the next message sent by a replica.
    pub async fn read_replica_message(&mut self) -> Result<Option<ReplicaMessage>> {
        let Some(tag) = self.read_byte().await? else {
            return Ok(None);
        };
        let msg = match tag {
            tags::REPLICA_BEGIN => ReplicaMessage::Begin {
                version: self.read_u8("protocol version").await?,
            },
            tags::REPLICA_ERROR => ReplicaMessage::Error(self.read_text().await?),
            tags::REPLICA_END => ReplicaMessage::End,
            tags::REPLICA_HASH => {
                let mut fp = [0u8; FINGERPRINT_LEN];
                self.fill(&mut fp, "page hash").await?;
                ReplicaMessage::Hash(Fingerprint::from_bytes(fp))
            }
            tags::REPLICA_READY => ReplicaMessage::Ready,
            tags::REPLICA_MSG => ReplicaMessage::Msg(self.read_text().await?),
            other => return Err(self.unknown(other)),
        };
        Ok(Some(msg))
    }
}

/// Writing half of a peer connection.
///
/// Writes are buffered; [`WireWriter::flush`] must run before waiting on
/// the peer. Every byte written is also copied to the mirror, if set.
pub struct WireWriter<W> {
    inner: BufWriter<W>,
    sent: u64,
    mirror: Option<Box<dyn Write + Send>>,
}

impl<W: AsyncWrite + Unpin> WireWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
            sent: 0,
            mirror: None,
        }
    }

    /// Copy all outgoing traffic to `mirror`.
    pub fn set_mirror(&mut self, mirror: Box<dyn Write + Send>) {
        self.mirror = Some(mirror);
    }

    /// Bytes written so far.
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    fn copy_to_mirror(&mut self, data: &[u8]) {
        if let Some(mirror) = self.mirror.as_mut() {
            if let Err(e) = mirror.write_all(data) {
                tracing::warn!(error = %e, "traffic log write failed; disabling it");
                self.mirror = None;
            }
        }
    }

    /// Write raw bytes.
    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.copy_to_mirror(data);
        self.inner.write_all(data).await.map_err(SyncError::Write)?;
        self.sent += data.len() as u64;
        Ok(())
    }

    pub async fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_bytes(&[byte]).await
    }

    /// Write a big-endian `u32`.
    pub async fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes()).await
    }

    /// Write a page size as its base-2 logarithm.
    pub async fn write_pow2(&mut self, page_size: PageSize) -> Result<()> {
        self.write_byte(page_size.log2()).await
    }

    /// Write a length-prefixed string.
    pub async fn write_text(&mut self, text: &str) -> Result<()> {
        let len = u32::try_from(text.len())
            .map_err(|_| SyncError::Protocol(format!("{}-byte message text", text.len())))?;
        self.write_u32(len).await?;
        self.write_bytes(text.as_bytes()).await
    }

    /// Send one origin message.
    pub async fn write_origin_message(&mut self, msg: &OriginMessage) -> Result<()> {
        self.write_byte(msg.tag()).await?;
        match msg {
            OriginMessage::Begin {
                version,
                page_size,
                page_count,
            } => {
                self.write_byte(*version).await?;
                self.write_pow2(*page_size).await?;
                self.write_u32(*page_count).await
            }
            OriginMessage::End => Ok(()),
            OriginMessage::Error(text) | OriginMessage::Msg(text) => self.write_text(text).await,
            OriginMessage::Page { pgno, data } => {
                self.write_u32(pgno.get()).await?;
                self.write_bytes(data).await
            }
            OriginMessage::Txn { page_count } => self.write_u32(*page_count).await,
        }
    }

    /// Send one replica message.
    pub async fn write_replica_message(&mut self, msg: &ReplicaMessage) -> Result<()> {
        self.write_byte(msg.tag()).await?;
        match msg {
            ReplicaMessage::Begin { version } => self.write_byte(*version).await,
            ReplicaMessage::Error(text) | ReplicaMessage::Msg(text) => self.write_text(text).await,
            ReplicaMessage::Hash(fp) => self.write_bytes(fp.as_bytes()).await,
            ReplicaMessage::End | ReplicaMessage::Ready => Ok(()),
        }
    }

    /// Push buffered bytes to the peer.
    pub async fn flush(&mut self) -> Result<()> {
        if let Some(mirror) = self.mirror.as_mut() {
            let _ = mirror.flush();
        }
        self.inner.flush().await.map_err(SyncError::Write)
    }

    /// Flush and close the stream so the peer sees end of input.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.flush().await?;
        self.inner.shutdown().await.map_err(SyncError::Write)
    }

    /// Unwrap the underlying stream. Bytes not yet flushed are lost.
    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}
