use storedal_core::db::migrations::latest_version;
use storedal_core::db::{open_db, open_db_in_memory, open_db_with, DbError, OpenOptions};
use storedal_core::{Category, ExecutionStrategy, RepoError, UnitOfWork};
use rusqlite::Connection;
use std::time::Duration;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "categories");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db_with(&path, &OpenOptions::default().with_busy_timeout(Duration::ZERO))
        .unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "categories");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn inserted_rows_receive_store_generated_version() {
    let conn = open_db_in_memory().unwrap();
    conn.execute("INSERT INTO categories (name) VALUES ('Foo');", [])
        .unwrap();

    let version: Vec<u8> = conn
        .query_row("SELECT row_version FROM categories;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version.len(), 8);
}

#[test]
fn unit_of_work_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();

    let err = UnitOfWork::<Category>::new(conn, ExecutionStrategy::none()).err().unwrap();
    assert!(matches!(err, RepoError::InvalidData(message) if message.contains("schema version")));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
