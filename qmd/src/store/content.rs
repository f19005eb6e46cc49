//! Content-addressed document bodies.
//!
//! Bodies are stored once per SHA-256 hash; documents reference them by
//! hash. Rows outlive deactivated documents until an orphan sweep runs.

use rusqlite::{OptionalExtension, params};

use super::Store;
use crate::error::Result;

impl Store {
    /// Insert a body under its hash. No-op when the hash already exists.
    pub fn insert_content(&self, hash: &str, doc: &str, created_at: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO content (hash, doc, created_at) VALUES (?1, ?2, ?3)",
            params![hash, doc, created_at],
        )?;
        Ok(())
    }

    /// Fetch a body by hash.
    pub fn get_content(&self, hash: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT doc FROM content WHERE hash = ?1", [hash], |r| {
                r.get(0)
            })
            .optional()?)
    }

    /// Delete content rows no active document references. Returns the
    /// number of rows removed.
    pub fn cleanup_orphaned_content(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM content
             WHERE hash NOT IN (SELECT hash FROM documents WHERE active = 1)",
            [],
        )?;
        Ok(removed)
    }

    /// Hard-delete documents previously soft-deleted by reindexing.
    pub fn delete_inactive_documents(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM documents WHERE active = 0", [])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::super::Store;

    #[test]
    fn insert_is_idempotent() {
        let (store, _dir) = test_store();
        let hash = Store::hash_content("body");
        store.insert_content(&hash, "body", "2026-01-01T00:00:00Z").unwrap();
        store.insert_content(&hash, "body", "2026-02-01T00:00:00Z").unwrap();

        let count: usize = store
            .conn
            .query_row("SELECT COUNT(*) FROM content", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        // First write wins.
        let created: String = store
            .conn
            .query_row("SELECT created_at FROM content WHERE hash = ?1", [&hash], |r| r.get(0))
            .unwrap();
        assert_eq!(created, "2026-01-01T00:00:00Z");
    }

    #[test]
    fn orphan_cleanup_is_idempotent() {
        let (store, _dir) = test_store();
        let hash = Store::hash_content("orphan");
        store.insert_content(&hash, "orphan", "2026-01-01T00:00:00Z").unwrap();

        assert_eq!(store.cleanup_orphaned_content().unwrap(), 1);
        assert_eq!(store.cleanup_orphaned_content().unwrap(), 0);
        assert_eq!(store.get_content(&hash).unwrap(), None);
    }

    #[test]
    fn referenced_content_survives_cleanup() {
        let (store, _dir) = test_store();
        let now = "2026-01-01T00:00:00Z";
        let coll = store.get_or_create_collection("/repo", "**/*.md", now).unwrap();
        let hash = Store::hash_content("keep me");
        store.insert_content(&hash, "keep me", now).unwrap();
        store
            .insert_document(coll.id, "keep.md", "Keep", &hash, now, now)
            .unwrap();

        assert_eq!(store.cleanup_orphaned_content().unwrap(), 0);
        assert!(store.get_content(&hash).unwrap().is_some());
    }
}
