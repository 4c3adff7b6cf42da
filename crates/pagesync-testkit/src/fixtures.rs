//! Test fixtures and helpers.
//!
//! Common setup code for integration tests. Helpers here panic on failure,
//! since a broken fixture should fail the test that uses it.

use std::path::{Path, PathBuf};

use pagesync_core::{PageNumber, PageSize};
use pagesync_store::{MemoryPageStore, SqliteOpener, SqliteStoreConfig};
use rusqlite::{params, Connection};
use tempfile::TempDir;

/// Deterministic content for page `pgno`.
///
/// Pages with different `pgno` or `generation` always differ in their first
/// eight bytes; the remainder is a pattern derived from both.
pub fn page_image(page_size: PageSize, pgno: u32, generation: u32) -> Vec<u8> {
    let mut page = vec![0u8; page_size.bytes()];
    page[..4].copy_from_slice(&pgno.to_be_bytes());
    page[4..8].copy_from_slice(&generation.to_be_bytes());
    let seed = pgno.wrapping_mul(31).wrapping_add(generation.wrapping_mul(17));
    for (i, byte) in page.iter_mut().enumerate().skip(8) {
        *byte = (i as u32).wrapping_mul(13).wrapping_add(seed) as u8;
    }
    page
}

fn images(page_size: PageSize, count: u32, generation: u32) -> Vec<Vec<u8>> {
    (1..=count)
        .map(|pgno| page_image(page_size, pgno, generation))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory pair
// ─────────────────────────────────────────────────────────────────────────────

/// An origin and a replica held in memory.
///
/// The origin starts with `page_count` pages of generation 0 content. The
/// replica starts empty, as a file that does not exist yet.
#[derive(Clone)]
pub struct StorePair {
    pub page_size: PageSize,
    pub origin: MemoryPageStore,
    pub replica: MemoryPageStore,
}

impl StorePair {
    /// Create a pair with an empty replica.
    pub fn new(page_size: PageSize, page_count: u32) -> Self {
        Self {
            page_size,
            origin: MemoryPageStore::with_pages(page_size, images(page_size, page_count, 0)),
            replica: MemoryPageStore::new(),
        }
    }

    /// Give the replica an exact copy of the origin.
    pub fn with_replica_copy(self) -> Self {
        let count = self.origin_pages().len() as u32;
        self.with_replica_pages(count)
    }

    /// Give the replica `count` pages matching the origin where both have
    /// them. Pages beyond the origin's end get generation 9 content.
    pub fn with_replica_pages(mut self, count: u32) -> Self {
        let origin = self.origin_pages();
        let pages = (1..=count)
            .map(|pgno| {
                origin
                    .get(pgno as usize - 1)
                    .cloned()
                    .unwrap_or_else(|| page_image(self.page_size, pgno, 9))
            })
            .collect();
        self.replica = MemoryPageStore::with_pages(self.page_size, pages);
        self
    }

    /// Overwrite replica page `pgno` with content the origin does not have.
    pub fn with_replica_page_changed(self, pgno: u32) -> Self {
        let page = page_image(self.page_size, pgno, 1);
        self.replica
            .set_page(PageNumber::new(pgno).expect("page number"), page)
            .expect("set replica page");
        self
    }

    /// Overwrite origin page `pgno` with new content.
    pub fn with_origin_page_changed(self, pgno: u32, generation: u32) -> Self {
        let page = page_image(self.page_size, pgno, generation);
        self.origin
            .set_page(PageNumber::new(pgno).expect("page number"), page)
            .expect("set origin page");
        self
    }

    /// Reserve page `pgno` on both sides as the lock-byte page.
    pub fn with_lock_byte_page(mut self, pgno: u32) -> Self {
        let offset = u64::from(pgno - 1) * u64::from(self.page_size.get());
        self.origin = self.origin.with_lock_byte_offset(offset);
        self.replica = self.replica.with_lock_byte_offset(offset);
        self
    }

    fn origin_pages(&self) -> Vec<Vec<u8>> {
        self.origin
            .pages()
            .expect("origin pages")
            .into_iter()
            .map(|b| b.to_vec())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite files
// ─────────────────────────────────────────────────────────────────────────────

/// A temporary directory holding an origin and a replica database file.
pub struct SqliteFixture {
    dir: TempDir,
    config: SqliteStoreConfig,
}

impl SqliteFixture {
    /// Create an empty directory. Neither database exists yet.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
            config: SqliteStoreConfig::default(),
        }
    }

    /// Use `config` for the openers this fixture hands out.
    pub fn with_config(mut self, config: SqliteStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory holding both files.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn origin_path(&self) -> PathBuf {
        self.dir.path().join("origin.db")
    }

    pub fn replica_path(&self) -> PathBuf {
        self.dir.path().join("replica.db")
    }

    pub fn origin_opener(&self) -> SqliteOpener {
        SqliteOpener::with_config(self.origin_path(), self.config.clone())
    }

    pub fn replica_opener(&self) -> SqliteOpener {
        SqliteOpener::with_config(self.replica_path(), self.config.clone())
    }

    /// Create the origin in WAL mode with `rows` rows in table `t`.
    pub fn create_origin(&self, page_size: u32, rows: u32) {
        let conn = Connection::open(self.origin_path()).expect("open origin");
        conn.execute_batch(&format!("PRAGMA page_size={page_size}"))
            .expect("page_size");
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .expect("journal_mode");
        assert_eq!(mode, "wal");
        conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, body TEXT)")
            .expect("create table");
        drop(conn);
        self.insert_rows(&self.origin_path(), rows);
    }

    /// Create the origin in rollback-journal mode.
    pub fn create_origin_without_wal(&self) {
        let conn = Connection::open(self.origin_path()).expect("open origin");
        conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, body TEXT)")
            .expect("create table");
    }

    /// Append `rows` rows to table `t` of the database at `path`.
    pub fn insert_rows(&self, path: &Path, rows: u32) {
        let mut conn = Connection::open(path).expect("open");
        let tx = conn.transaction().expect("begin");
        for i in 0..rows {
            tx.execute(
                "INSERT INTO t(body) VALUES(?1)",
                params![format!("row {i} {}", "x".repeat(300))],
            )
            .expect("insert");
        }
        tx.commit().expect("commit");
    }

    /// Delete all but `keep` rows from the origin and vacuum it.
    pub fn shrink_origin(&self, keep: u32) {
        let conn = Connection::open(self.origin_path()).expect("open origin");
        conn.execute("DELETE FROM t WHERE id > ?1", params![keep])
            .expect("delete");
        conn.execute_batch("VACUUM").expect("vacuum");
    }

    /// Number of rows in table `t`.
    pub fn row_count(&self, path: &Path) -> u32 {
        let conn = Connection::open(path).expect("open");
        conn.query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .expect("count")
    }

    /// Result of `PRAGMA integrity_check`; `"ok"` when healthy.
    pub fn integrity_check(&self, path: &Path) -> String {
        let conn = Connection::open(path).expect("open");
        conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .expect("integrity_check")
    }

    /// Page count and page size, from the file's own pragmas.
    pub fn geometry(&self, path: &Path) -> (u32, u32) {
        let conn = Connection::open(path).expect("open");
        let count = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .expect("page_count");
        let size = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .expect("page_size");
        (count, size)
    }
}

impl Default for SqliteFixture {
    fn default() -> Self {
        Self::new()
    }
}
