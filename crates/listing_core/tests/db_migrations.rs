use listing_core::db::migrations::latest_version;
use listing_core::db::{open_db, open_db_in_memory, open_db_with_timeout, DbError};
use rusqlite::Connection;
use std::time::Duration;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "listings");
    assert_table_exists(&conn, "reviews");
    assert_table_exists(&conn, "listing_images");
}

#[test]
fn reopening_file_database_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("listings.db");

    let conn_first = open_db(&path).unwrap();
    conn_first
        .execute(
            "INSERT INTO listings (listing_type, name, created_at, updated_at)
             VALUES ('restaurant', 'Kosher Corner', 1, 1);",
            [],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db_with_timeout(&path, Duration::from_millis(250)).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let count: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM listings;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
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
fn schema_rejects_unknown_listing_type_and_orphan_reviews() {
    let conn = open_db_in_memory().unwrap();

    let bad_type = conn.execute(
        "INSERT INTO listings (listing_type, name, created_at, updated_at)
         VALUES ('hotel', 'Nope', 1, 1);",
        [],
    );
    assert!(bad_type.is_err());

    let orphan = conn.execute(
        "INSERT INTO reviews (listing_id, rating, created_at, updated_at)
         VALUES (404, 5, 1, 1);",
        [],
    );
    assert!(orphan.is_err(), "foreign keys must be enforced");
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
