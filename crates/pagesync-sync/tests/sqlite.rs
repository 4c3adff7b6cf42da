//! Sessions between real SQLite database files.

use tokio::io::duplex;

use pagesync_store::{OpenMode, OpenStore, SqliteOpener};
use pagesync_sync::{
    verify_convergence, ConvergenceResult, Role, Session, SyncConfig, SyncReport,
};
use pagesync_testkit::fixtures::SqliteFixture;

async fn sync(origin: &SqliteOpener, replica: &SqliteOpener) -> (SyncReport, SyncReport) {
    let (a, b) = duplex(64 * 1024);
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    let origin_session = Session::new(Role::Origin, a_read, a_write, SyncConfig::default());
    let replica_session =
        Session::new(Role::Replica, b_read, b_write, SyncConfig::default()).remote(true);
    tokio::join!(origin_session.run(origin), replica_session.run(replica))
}

/// Compare both files page by page through new connections.
async fn compare_files(fixture: &SqliteFixture) -> ConvergenceResult {
    let origin = SqliteOpener::new(fixture.origin_path())
        .open(OpenMode::Origin)
        .await
        .unwrap();
    let replica = SqliteOpener::new(fixture.replica_path())
        .open(OpenMode::Origin)
        .await
        .unwrap();
    verify_convergence(&origin, &replica).await.unwrap()
}

#[tokio::test]
async fn test_new_replica_is_a_valid_copy() {
    let fixture = SqliteFixture::new();
    fixture.create_origin(4096, 200);

    let (origin, replica) = sync(&fixture.origin_opener(), &fixture.replica_opener()).await;
    assert!(origin.is_success(), "{:?}", origin.messages);
    assert!(replica.is_success());
    assert_eq!(replica.hashes_sent, 0);
    assert_eq!(origin.pages_sent, u64::from(origin.page_count));

    let replica_path = fixture.replica_path();
    assert_eq!(fixture.integrity_check(&replica_path), "ok");
    assert_eq!(fixture.row_count(&replica_path), 200);
    assert_eq!(
        fixture.geometry(&replica_path),
        fixture.geometry(&fixture.origin_path())
    );
    assert_eq!(compare_files(&fixture).await, ConvergenceResult::Converged);
}

#[tokio::test]
async fn test_first_sync_leaves_nothing_to_resend() {
    let fixture = SqliteFixture::new();
    fixture.create_origin(4096, 60);
    let origin_opener = fixture.origin_opener();
    let replica_opener = fixture.replica_opener();

    let (first, _) = sync(&origin_opener, &replica_opener).await;
    assert!(first.is_success(), "{:?}", first.messages);
    assert_eq!(compare_files(&fixture).await, ConvergenceResult::Converged);

    for _ in 0..2 {
        let (origin, replica) = sync(&origin_opener, &replica_opener).await;
        assert!(origin.is_success());
        assert_eq!(replica.hashes_sent, u64::from(first.page_count));
        assert_eq!(origin.pages_sent, 0);
    }
}

#[tokio::test]
async fn test_resync_transfers_only_changes() {
    let fixture = SqliteFixture::new();
    fixture.create_origin(4096, 200);
    let origin_opener = fixture.origin_opener();
    let replica_opener = fixture.replica_opener();
    sync(&origin_opener, &replica_opener).await;

    let (origin, _) = sync(&origin_opener, &replica_opener).await;
    assert!(origin.is_success());
    assert_eq!(origin.pages_sent, 0);

    fixture.insert_rows(&fixture.origin_path(), 20);
    let (origin, replica) = sync(&origin_opener, &replica_opener).await;
    assert!(origin.is_success());
    assert!(replica.is_success());
    assert!(origin.pages_sent > 0);
    assert!(origin.pages_sent < u64::from(origin.page_count));
    assert_eq!(fixture.row_count(&fixture.replica_path()), 220);
    assert_eq!(fixture.integrity_check(&fixture.replica_path()), "ok");
}

#[tokio::test]
async fn test_replica_shrinks_after_vacuum() {
    let fixture = SqliteFixture::new();
    fixture.create_origin(1024, 400);
    sync(&fixture.origin_opener(), &fixture.replica_opener()).await;
    let (grown, _) = fixture.geometry(&fixture.replica_path());

    fixture.shrink_origin(10);
    let (origin, replica) = sync(&fixture.origin_opener(), &fixture.replica_opener()).await;
    assert!(origin.is_success(), "{:?}", origin.messages);
    assert!(replica.is_success());

    let replica_path = fixture.replica_path();
    let (count, size) = fixture.geometry(&replica_path);
    assert!(count < grown);
    assert_eq!((count, size), fixture.geometry(&fixture.origin_path()));
    assert_eq!(fixture.row_count(&replica_path), 10);
    assert_eq!(fixture.integrity_check(&replica_path), "ok");
}

#[tokio::test]
async fn test_rollback_journal_origin_is_refused() {
    let fixture = SqliteFixture::new();
    fixture.create_origin_without_wal();

    let (origin, replica) = sync(&fixture.origin_opener(), &fixture.replica_opener()).await;
    assert_eq!(origin.errors, 1);
    assert!(replica.is_success());
    assert!(!fixture.replica_path().exists());
}

#[tokio::test]
async fn test_mismatched_page_size_is_refused() {
    let fixture = SqliteFixture::new();
    fixture.create_origin(4096, 20);
    {
        let conn = rusqlite::Connection::open(fixture.replica_path()).unwrap();
        conn.execute_batch("PRAGMA page_size=8192").unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        conn.execute_batch("CREATE TABLE other(x)").unwrap();
    }

    let (origin, replica) = sync(&fixture.origin_opener(), &fixture.replica_opener()).await;
    assert!(!origin.is_success());
    assert!(!replica.is_success());
    assert_eq!(
        origin.messages,
        vec![
            "ERROR: page size mismatch; origin is 4096 bytes and replica is 8192 bytes"
                .to_string()
        ]
    );
    assert_eq!(fixture.geometry(&fixture.replica_path()).1, 8192);
}

#[tokio::test]
async fn test_missing_origin_is_reported() {
    let fixture = SqliteFixture::new();
    let (origin, replica) = sync(&fixture.origin_opener(), &fixture.replica_opener()).await;
    assert_eq!(origin.errors, 1);
    assert!(replica.is_success());
}
