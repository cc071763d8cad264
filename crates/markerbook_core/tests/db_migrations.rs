use markerbook_core::db::migrations::latest_version;
use markerbook_core::db::{open_db, open_db_in_memory};
use markerbook_core::{SqliteCategoryRepository, SqliteMarkerRepository};

#[test]
fn migrations_reach_latest_version_and_create_tables() {
    let conn = open_db_in_memory().unwrap();

    let version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, latest_version());

    for table in ["categories", "markers", "marker_examples", "documents"] {
        let exists: i64 = conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1
                );",
                [table],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exists, 1, "missing table {table}");
    }

    let mut stmt = conn.prepare("PRAGMA table_info(markers);").unwrap();
    let mut rows = stmt.query([]).unwrap();
    let mut columns = Vec::new();
    while let Some(row) = rows.next().unwrap() {
        let column_name: String = row.get(1).unwrap();
        columns.push(column_name);
    }
    for column in ["uuid", "name", "tags", "category_uuid", "updated_at"] {
        assert!(columns.contains(&column.to_string()), "missing {column}");
    }
}

#[test]
fn reopening_a_file_database_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("markerbook.sqlite3");

    {
        let conn = open_db(&path).unwrap();
        conn.execute(
            "INSERT INTO categories (uuid, name, description, parent_uuid, created_at)
             VALUES ('0c6a0a78-64b4-41b7-b2ce-1ffbcf43a0a1', 'Kept', NULL, NULL, 1);",
            [],
        )
        .unwrap();
    }

    let conn = open_db(&path).unwrap();
    let kept: i64 = conn
        .query_row("SELECT COUNT(*) FROM categories;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(kept, 1);
}

#[test]
fn repositories_reject_unmigrated_connections() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();

    assert!(SqliteCategoryRepository::try_new(&conn).is_err());
    assert!(SqliteMarkerRepository::try_new(&conn).is_err());
}
