//! SQLite implementation of the PageStore trait.
//!
//! Pages are read and written through the `sqlite_dbpage` virtual table, so
//! the bundled SQLite must be built with `SQLITE_ENABLE_DBPAGE_VTAB`. Every
//! call runs on `tokio::task::spawn_blocking` against a connection guarded
//! by a mutex.
//!
//! The origin opens its file directly as `main`. The replica opens an
//! in-memory connection and attaches its file as `replica`, which lets a
//! database that does not exist yet be created with the origin's page size.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use pagesync_core::{PageNumber, PageSize};

use crate::error::{Result, StoreError};
use crate::traits::{JournalMode, OpenMode, OpenStore, PageStore};

/// Byte offset of SQLite's lock-byte range.
pub const DEFAULT_PENDING_BYTE: u64 = 0x4000_0000;

/// Configuration for SQLite stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteStoreConfig {
    /// Offset of the lock-byte range. The page containing it is never
    /// compared or transferred. `None` disables the exclusion.
    pub pending_byte: Option<u64>,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            pending_byte: Some(DEFAULT_PENDING_BYTE),
        }
    }
}

/// Opens a SQLite database file as a [`SqlitePageStore`].
#[derive(Debug, Clone)]
pub struct SqliteOpener {
    path: PathBuf,
    config: SqliteStoreConfig,
}

impl SqliteOpener {
    /// Opener for the database at `path` with the default configuration.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, SqliteStoreConfig::default())
    }

    /// Opener for the database at `path`.
    pub fn with_config(path: impl Into<PathBuf>, config: SqliteStoreConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OpenStore for SqliteOpener {
    type Store = SqlitePageStore;

    async fn open(&self, mode: OpenMode) -> Result<Self::Store> {
        let path = self.path.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let (conn, schema, attached) = match mode {
                OpenMode::Origin => (open_origin(&path)?, "main", None),
                OpenMode::Replica => {
                    let (conn, name) = open_replica(&path)?;
                    (conn, "replica", Some(name))
                }
            };
            tracing::debug!(path = %path.display(), ?mode, "opened sqlite store");
            Ok(SqlitePageStore {
                conn: Arc::new(Mutex::new(conn)),
                schema,
                attached,
                config,
            })
        })
        .await
        .map_err(|e| StoreError::Blocking(e.to_string()))?
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn open_origin(path: &Path) -> Result<Connection> {
    // Read-write: a WAL database cannot be read through a read-only handle
    // unless its -shm file already exists.
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| StoreError::Open {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn open_replica(path: &Path) -> Result<(Connection, String)> {
    let name = path.to_str().ok_or_else(|| StoreError::Open {
        path: path.display().to_string(),
        reason: "path is not valid UTF-8".to_string(),
    })?;
    let conn = Connection::open_in_memory()?;

    // The in-memory database and the attached file must agree on text
    // encoding, and an empty in-memory database can still switch.
    let mut result = attach(&conn, name);
    for encoding in ["UTF-16le", "UTF-16be"] {
        match &result {
            Err(e) if is_wrong_encoding(e) => {
                tracing::debug!(encoding, "retrying attach with another encoding");
                conn.execute_batch(&format!("PRAGMA encoding='{encoding}'"))?;
                result = attach(&conn, name);
            }
            _ => break,
        }
    }
    result.map_err(|e| StoreError::Open {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok((conn, name.to_string()))
}

fn attach(conn: &Connection, name: &str) -> rusqlite::Result<()> {
    conn.execute("ATTACH ?1 AS replica", params![name]).map(|_| ())
}

/// Create an empty WAL database at `name` on a connection of its own.
///
/// The header switch to WAL is committed and the connection closed before
/// anything else touches the file. A transaction that starts on a file
/// still marked for a rollback journal commits through that journal, and
/// such a commit rewrites the change counter in page 1.
fn create_wal_file(name: &str, page_size: PageSize, encoding: &str) -> Result<()> {
    let conn = Connection::open(name)?;
    conn.execute_batch(&format!(
        "PRAGMA encoding='{encoding}'; PRAGMA page_size={};",
        page_size.get()
    ))?;
    let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    if !JournalMode::from_pragma(&mode).is_wal() {
        return Err(StoreError::Open {
            path: name.to_string(),
            reason: format!("cannot switch to WAL mode, journal mode is {mode}"),
        });
    }
    let _: i64 = conn.query_row("SELECT count(*) FROM sqlite_schema", [], |row| row.get(0))?;
    conn.close().map_err(|(_, e)| StoreError::Database(e))
}

fn is_wrong_encoding(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("must use the same text encoding")
    )
}

/// A SQLite database accessed page by page.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqlitePageStore {
    conn: Arc<Mutex<Connection>>,
    /// Schema the database is visible under: `main` or `replica`.
    schema: &'static str,
    /// File name of the attached replica database.
    attached: Option<String>,
    config: SqliteStoreConfig,
}

impl SqlitePageStore {
    /// Run a blocking operation on the connection.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &'static str) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let schema = self.schema;
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("mutex poisoned: {}", e)))?;
            f(&conn, schema)
        })
        .await
        .map_err(|e| StoreError::Blocking(e.to_string()))?
    }
}

fn pragma_u32(conn: &Connection, schema: &str, name: &str) -> Result<u32> {
    let value: u32 = conn.query_row(&format!("PRAGMA {schema}.{name}"), [], |row| row.get(0))?;
    Ok(value)
}

#[async_trait]
impl PageStore for SqlitePageStore {
    async fn page_size(&self) -> Result<PageSize> {
        let bytes = self
            .with_conn(|conn, schema| pragma_u32(conn, schema, "page_size"))
            .await?;
        Ok(PageSize::new(bytes)?)
    }

    async fn page_count(&self) -> Result<u32> {
        self.with_conn(|conn, schema| pragma_u32(conn, schema, "page_count"))
            .await
    }

    async fn journal_mode(&self) -> Result<JournalMode> {
        self.with_conn(|conn, schema| {
            let mode: String = conn.query_row(
                &format!("PRAGMA {schema}.journal_mode"),
                [],
                |row| row.get(0),
            )?;
            Ok(JournalMode::from_pragma(&mode))
        })
        .await
    }

    async fn initialize(&self, page_size: PageSize) -> Result<()> {
        let attached = self.attached.clone();
        self.with_conn(move |conn, schema| {
            let count = pragma_u32(conn, schema, "page_count")?;
            if count > 0 {
                return Err(StoreError::AlreadyInitialized(count));
            }
            let Some(name) = attached else {
                return Err(StoreError::Transaction(
                    "only a replica database can be initialized".into(),
                ));
            };
            let encoding: String =
                conn.query_row("PRAGMA main.encoding", [], |row| row.get(0))?;

            conn.execute_batch(&format!("DETACH {schema}"))?;
            create_wal_file(&name, page_size, &encoding)?;
            attach(conn, &name)?;
            tracing::debug!(page_size = page_size.get(), "initialized empty database");
            Ok(())
        })
        .await
    }

    fn lock_byte_page(&self, page_size: PageSize) -> Option<PageNumber> {
        let offset = self.config.pending_byte?;
        let pgno = u32::try_from(offset / u64::from(page_size.get()) + 1).ok()?;
        PageNumber::new(pgno).ok()
    }

    async fn begin_read(&self) -> Result<()> {
        self.with_conn(|conn, _| {
            conn.execute_batch("BEGIN")?;
            Ok(())
        })
        .await
    }

    async fn begin_write(&self) -> Result<()> {
        self.with_conn(|conn, _| {
            conn.execute_batch("BEGIN IMMEDIATE; PRAGMA writable_schema=ON;")?;
            Ok(())
        })
        .await
    }

    async fn commit(&self) -> Result<()> {
        self.with_conn(|conn, _| {
            if conn.is_autocommit() {
                return Err(StoreError::Transaction("no transaction to commit".into()));
            }
            conn.execute_batch("COMMIT")?;
            Ok(())
        })
        .await
    }

    async fn rollback(&self) -> Result<()> {
        self.with_conn(|conn, _| {
            if conn.is_autocommit() {
                return Err(StoreError::Transaction(
                    "no transaction to roll back".into(),
                ));
            }
            conn.execute_batch("ROLLBACK")?;
            Ok(())
        })
        .await
    }

    async fn read_page(&self, pgno: PageNumber) -> Result<Option<Bytes>> {
        self.with_conn(move |conn, schema| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT data FROM sqlite_dbpage('{schema}') WHERE pgno=?1"
            ))?;
            let data: Option<Vec<u8>> = stmt
                .query_row(params![pgno.get()], |row| row.get(0))
                .optional()?;
            Ok(data.map(Bytes::from))
        })
        .await
    }

    async fn write_page(&self, pgno: PageNumber, data: Bytes) -> Result<()> {
        self.with_conn(move |conn, schema| {
            let mut stmt = conn.prepare_cached(&format!(
                "INSERT INTO sqlite_dbpage(pgno,data,schema) VALUES(?1,?2,'{schema}')"
            ))?;
            stmt.execute(params![pgno.get(), &data[..]])?;
            Ok(())
        })
        .await
    }

    async fn truncate(&self, page_count: u32) -> Result<()> {
        self.with_conn(move |conn, schema| {
            // A NULL page at N deletes page N and everything after it when
            // the transaction commits.
            let mut stmt = conn.prepare_cached(&format!(
                "INSERT INTO sqlite_dbpage(pgno,data,schema) VALUES(?1,NULL,'{schema}')"
            ))?;
            stmt.execute(params![page_count.saturating_add(1)])?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.with_conn(|conn, _| {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a WAL-mode database with a table of `rows` rows.
    fn create_wal_db(path: &Path, rows: u32) {
        let conn = Connection::open(path).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, body TEXT)")
            .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO t(body) VALUES(?1)",
                params![format!("row {i} {}", "x".repeat(200))],
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_origin_reads_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("origin.db");
        create_wal_db(&path, 50);

        let store = SqliteOpener::new(&path)
            .open(OpenMode::Origin)
            .await
            .unwrap();
        store.begin_read().await.unwrap();
        assert!(store.journal_mode().await.unwrap().is_wal());
        assert_eq!(store.page_size().await.unwrap().get(), 4096);

        let count = store.page_count().await.unwrap();
        assert!(count >= 2);
        let first = store.read_page(PageNumber::FIRST).await.unwrap().unwrap();
        assert_eq!(first.len(), 4096);
        assert_eq!(&first[..16], b"SQLite format 3\0");
        let past_end = PageNumber::new(count + 1).unwrap();
        assert!(store.read_page(past_end).await.unwrap().is_none());
        store.commit().await.unwrap();
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_origin_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteOpener::new(dir.path().join("missing.db"))
            .open(OpenMode::Origin)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Open { .. }));
    }

    #[tokio::test]
    async fn test_replica_copy_is_valid_database() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin.db");
        let replica_path = dir.path().join("replica.db");
        create_wal_db(&origin_path, 100);

        let origin = SqliteOpener::new(&origin_path)
            .open(OpenMode::Origin)
            .await
            .unwrap();
        origin.begin_read().await.unwrap();
        let page_size = origin.page_size().await.unwrap();
        let count = origin.page_count().await.unwrap();

        let replica = SqliteOpener::new(&replica_path)
            .open(OpenMode::Replica)
            .await
            .unwrap();
        assert_eq!(replica.page_count().await.unwrap(), 0);
        replica.initialize(page_size).await.unwrap();
        assert!(replica.journal_mode().await.unwrap().is_wal());

        replica.begin_write().await.unwrap();
        for pgno in PageNumber::range_to(count) {
            let data = origin.read_page(pgno).await.unwrap().unwrap();
            replica.write_page(pgno, data).await.unwrap();
        }
        replica.commit().await.unwrap();
        origin.commit().await.unwrap();
        assert_eq!(replica.page_count().await.unwrap(), count);
        replica.close().await.unwrap();
        drop(replica);

        let conn = Connection::open(&replica_path).unwrap();
        let check: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .unwrap();
        assert_eq!(check, "ok");
        let rows: i64 = conn
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 100);
    }

    #[tokio::test]
    async fn test_new_replica_keeps_pages_as_written() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin.db");
        let replica_path = dir.path().join("replica.db");
        create_wal_db(&origin_path, 30);

        let origin = SqliteOpener::new(&origin_path)
            .open(OpenMode::Origin)
            .await
            .unwrap();
        origin.begin_read().await.unwrap();
        let count = origin.page_count().await.unwrap();
        let mut pages = Vec::new();
        for pgno in PageNumber::range_to(count) {
            pages.push(origin.read_page(pgno).await.unwrap().unwrap());
        }
        origin.commit().await.unwrap();

        let replica = SqliteOpener::new(&replica_path)
            .open(OpenMode::Replica)
            .await
            .unwrap();
        replica.initialize(PageSize::DEFAULT).await.unwrap();
        replica.begin_write().await.unwrap();
        for (pgno, data) in PageNumber::range_to(count).zip(pages.iter().cloned()) {
            replica.write_page(pgno, data).await.unwrap();
        }
        replica.commit().await.unwrap();
        replica.close().await.unwrap();
        drop(replica);

        let reopened = SqliteOpener::new(&replica_path)
            .open(OpenMode::Origin)
            .await
            .unwrap();
        reopened.begin_read().await.unwrap();
        assert_eq!(reopened.page_count().await.unwrap(), count);
        for (pgno, expected) in PageNumber::range_to(count).zip(pages.iter()) {
            let actual = reopened.read_page(pgno).await.unwrap().unwrap();
            assert_eq!(&actual, expected, "page {pgno} differs");
        }
        reopened.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards_page_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");
        create_wal_db(&path, 10);

        let replica = SqliteOpener::new(&path)
            .open(OpenMode::Replica)
            .await
            .unwrap();
        let before = replica.read_page(PageNumber::FIRST).await.unwrap().unwrap();
        replica.begin_write().await.unwrap();
        let pgno = PageNumber::new(2).unwrap();
        replica
            .write_page(pgno, Bytes::from(vec![0u8; 4096]))
            .await
            .unwrap();
        replica.rollback().await.unwrap();
        assert_eq!(
            replica.read_page(PageNumber::FIRST).await.unwrap().unwrap(),
            before
        );
        assert!(replica.read_page(pgno).await.unwrap().unwrap().iter().any(|&b| b != 0));
    }

    #[tokio::test]
    async fn test_initialize_refuses_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");
        create_wal_db(&path, 1);

        let replica = SqliteOpener::new(&path)
            .open(OpenMode::Replica)
            .await
            .unwrap();
        let err = replica.initialize(PageSize::DEFAULT).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInitialized(_)));
    }

    #[tokio::test]
    async fn test_lock_byte_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("origin.db");
        create_wal_db(&path, 1);

        let store = SqliteOpener::new(&path)
            .open(OpenMode::Origin)
            .await
            .unwrap();
        assert_eq!(
            store.lock_byte_page(PageSize::DEFAULT).map(PageNumber::get),
            Some(262_145)
        );
        assert_eq!(
            store
                .lock_byte_page(PageSize::new(512).unwrap())
                .map(PageNumber::get),
            Some(2_097_153)
        );

        let store = SqliteOpener::with_config(&path, SqliteStoreConfig { pending_byte: None })
            .open(OpenMode::Origin)
            .await
            .unwrap();
        assert!(store.lock_byte_page(PageSize::DEFAULT).is_none());
    }
}
