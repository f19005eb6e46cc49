//! One-shot migration from the legacy flat schema.
//!
//! Early databases stored document bodies directly on `documents` and
//! addressed files by absolute path. The migration folds bodies into the
//! content-addressed `content` table, derives collection-relative paths,
//! and regenerates collection names, all inside a single transaction.

use std::collections::HashSet;

use rusqlite::{Connection, params};

use super::Store;
use crate::error::Result;

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Detect and migrate a legacy database. Returns true when a migration
/// ran. Any failure rolls the whole thing back.
pub(crate) fn migrate_legacy_schema(conn: &Connection) -> Result<bool> {
    let legacy = table_exists(conn, "documents")? && !table_exists(conn, "content")?;
    if !legacy {
        return Ok(false);
    }

    conn.execute_batch("BEGIN")?;
    match run_migration(conn) {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(true)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

fn run_migration(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "ALTER TABLE documents RENAME TO documents_legacy;
         ALTER TABLE collections RENAME TO collections_legacy;
         DROP TRIGGER IF EXISTS documents_fts_insert;
         DROP TRIGGER IF EXISTS documents_fts_delete;
         DROP TRIGGER IF EXISTS documents_fts_update;
         DROP TABLE IF EXISTS documents_fts;",
    )?;

    Store::init_schema(conn)?;

    // Collections: names come from pwd basenames, `-{id}` on collision.
    let mut stmt = conn.prepare(
        "SELECT id, pwd, glob_pattern, created_at, updated_at
         FROM collections_legacy ORDER BY id",
    )?;
    let collections: Vec<(i64, String, String, String, String)> = stmt
        .query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut taken: HashSet<String> = HashSet::new();
    for (id, pwd, glob_pattern, created_at, updated_at) in &collections {
        let base = std::path::Path::new(pwd)
            .file_name()
            .map_or_else(|| "root".to_string(), |s| s.to_string_lossy().to_string());
        let name = if taken.contains(&base) {
            format!("{base}-{id}")
        } else {
            base
        };
        taken.insert(name.clone());

        conn.execute(
            "INSERT INTO collections (id, name, pwd, glob_pattern, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, name, pwd, glob_pattern, created_at, updated_at],
        )?;
    }

    // Documents: hash each body, fold duplicates into content (earliest
    // created_at wins via insert order + OR IGNORE), relativize paths.
    let mut stmt = conn.prepare(
        "SELECT d.id, d.collection_id, d.filepath, d.title, d.body,
                d.created_at, d.modified_at, d.active, c.pwd
         FROM documents_legacy d
         JOIN collections_legacy c ON c.id = d.collection_id
         ORDER BY d.created_at, d.id",
    )?;
    #[allow(clippy::type_complexity)]
    let documents: Vec<(i64, i64, String, String, String, String, String, i64, String)> = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
                r.get(8)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    for (id, collection_id, filepath, title, body, created_at, modified_at, active, pwd) in
        &documents
    {
        let hash = Store::hash_content(body);
        conn.execute(
            "INSERT OR IGNORE INTO content (hash, doc, created_at) VALUES (?1, ?2, ?3)",
            params![hash, body, created_at],
        )?;

        let relative = filepath
            .strip_prefix(&format!("{pwd}/"))
            .unwrap_or(filepath);
        let relative = Store::handelize(relative);

        // The insert trigger repopulates documents_fts from content.
        conn.execute(
            "INSERT INTO documents
                 (id, collection_id, path, title, hash, created_at, modified_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![id, collection_id, relative, title, hash, created_at, modified_at, active],
        )?;
    }

    conn.execute_batch(
        "DROP TABLE documents_legacy;
         DROP TABLE collections_legacy;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_db(path: &std::path::Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE collections (
                id INTEGER PRIMARY KEY,
                pwd TEXT NOT NULL,
                glob_pattern TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE documents (
                id INTEGER PRIMARY KEY,
                collection_id INTEGER NOT NULL,
                filepath TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );",
        )
        .unwrap();

        conn.execute_batch(
            "INSERT INTO collections VALUES
                (1, '/home/me/notes', '**/*.md', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z'),
                (2, '/work/notes', '**/*.md', '2025-01-02T00:00:00Z', '2025-01-02T00:00:00Z');
            INSERT INTO documents VALUES
                (1, 1, '/home/me/notes/a.md', 'A', '# A\nshared body',
                 '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z', 1),
                (2, 1, '/home/me/notes/sub/b.md', 'B', '# A\nshared body',
                 '2025-01-03T00:00:00Z', '2025-01-03T00:00:00Z', 1),
                (3, 2, '/work/notes/c.md', 'C', '# C\nunique body',
                 '2025-01-02T00:00:00Z', '2025-01-02T00:00:00Z', 1);",
        )
        .unwrap();
    }

    #[test]
    fn migrates_flat_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.sqlite");
        legacy_db(&path);

        let store = Store::open(&path).unwrap();

        // Duplicate bodies folded to one content row, earliest wins.
        let content_rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM content", [], |r| r.get(0))
            .unwrap();
        assert_eq!(content_rows, 2);
        let created: String = store
            .conn
            .query_row(
                "SELECT created_at FROM content WHERE hash = ?1",
                [Store::hash_content("# A\nshared body")],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(created, "2025-01-01T00:00:00Z");

        // Collection names regenerated, collision gets -{id}.
        assert!(store.get_collection("notes").unwrap().is_some());
        assert!(store.get_collection("notes-2").unwrap().is_some());

        // Paths relativized and FTS repopulated through the triggers.
        let doc = store.get_document("notes", "sub/b.md").unwrap().unwrap();
        assert_eq!(doc.title, "B");
        assert_eq!(store.search_fts("unique", 10, None).unwrap().len(), 1);

        // Legacy tables are gone.
        let leftovers: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE '%_legacy'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn fresh_database_skips_migration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.sqlite");
        drop(Store::open(&path).unwrap());
        // Re-opening a current-schema database must not migrate.
        let conn = Connection::open(&path).unwrap();
        assert!(!migrate_legacy_schema(&conn).unwrap());
    }
}
