//! Runs the built binary. A local-to-local sync starts a second copy of the
//! binary as the replica, so these tests cover the real child process.

use std::process::{Command, Output};

use pagesync_testkit::fixtures::SqliteFixture;

fn pagesync(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pagesync"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run pagesync")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_local_sync() {
    let fixture = SqliteFixture::new();
    fixture.create_origin(4096, 120);
    let origin = fixture.origin_path();
    let replica = fixture.replica_path();

    let output = pagesync(&[origin.to_str().unwrap(), replica.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "");
    assert_eq!(fixture.row_count(&replica), 120);
    assert_eq!(fixture.integrity_check(&replica), "ok");
}

#[test]
fn test_verbose_summary() {
    let fixture = SqliteFixture::new();
    fixture.create_origin(4096, 10);
    let origin = fixture.origin_path();
    let replica = fixture.replica_path();

    let output = pagesync(&["-v", origin.to_str().unwrap(), replica.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("sent "), "{text}");
    assert!(text.contains(" bytes, received "), "{text}");
    assert!(text.contains("total size "), "{text}");
}

#[test]
fn test_very_verbose_prints_launch_command() {
    let fixture = SqliteFixture::new();
    fixture.create_origin(4096, 10);
    let origin = fixture.origin_path();
    let replica = fixture.replica_path();

    let output = pagesync(&["-vv", origin.to_str().unwrap(), replica.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    let first = stdout(&output).lines().next().unwrap_or_default().to_string();
    assert!(first.contains("--replica"), "{first}");
}

#[test]
fn test_non_wal_origin_fails() {
    let fixture = SqliteFixture::new();
    fixture.create_origin_without_wal();
    let origin = fixture.origin_path();
    let replica = fixture.replica_path();

    let output = pagesync(&[origin.to_str().unwrap(), replica.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout(&output), "Databases were not synced due to errors\n");
    assert!(stderr(&output).contains("origin database is not in WAL mode"));
    assert!(!replica.exists());
}

#[test]
fn test_two_remote_databases_refused() {
    let output = pagesync(&["a:x.db", "b:y.db"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("At least one of ORIGIN and REPLICA must be a local database"));
}

#[test]
fn test_missing_replica_argument() {
    let output = pagesync(&["x.db"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("missing REPLICA database filename"));
}

#[test]
fn test_conflicting_roles_rejected() {
    let output = pagesync(&["--origin", "--replica", "a.db", "b.db"]);
    assert!(!output.status.success());
}

#[cfg(unix)]
#[test]
fn test_arg_escape_check() {
    let output = pagesync(&["--arg-escape-check", "my file.db", "it's.db"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.trim_end().ends_with(r"--arg-escape-check 'my file.db' it\'s.db"), "{text}");
}

#[test]
fn test_local_comm_check() {
    let output = pagesync(&["--commcheck", "a.db", "b.db"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("origin origin=\"a.db\""), "{text}");
    assert!(text.contains("replica origin=\"a.db\" replica=\"b.db\" remote=true"), "{text}");
}
