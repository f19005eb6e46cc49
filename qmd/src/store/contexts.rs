//! Path-prefix context annotations.
//!
//! A context is a free-text note attached to a collection subtree. The
//! empty prefix annotates the collection root; lookups return the context
//! of the longest matching prefix.

use rusqlite::{OptionalExtension, params};

use super::Store;
use crate::error::{QmdError, Result};

/// A configured context annotation.
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub id: i64,
    pub collection: String,
    /// Path prefix within the collection; empty means the root.
    pub path: String,
    pub context: String,
    pub created_at: String,
}

impl Store {
    /// Insert or replace the context for `(collection, path_prefix)`.
    pub fn add_context(
        &self,
        collection_name: &str,
        path_prefix: &str,
        context: &str,
        now: &str,
    ) -> Result<()> {
        let coll = self
            .get_collection(collection_name)?
            .ok_or_else(|| QmdError::not_found("collection", collection_name))?;

        self.conn.execute(
            "INSERT INTO path_contexts (collection_id, path_prefix, context, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (collection_id, path_prefix)
             DO UPDATE SET context = excluded.context",
            params![coll.id, path_prefix, context, now],
        )?;
        Ok(())
    }

    /// Remove a context. Returns false when none existed.
    pub fn remove_context(&self, collection_name: &str, path_prefix: &str) -> Result<bool> {
        let Some(coll) = self.get_collection(collection_name)? else {
            return Ok(false);
        };
        let removed = self.conn.execute(
            "DELETE FROM path_contexts WHERE collection_id = ?1 AND path_prefix = ?2",
            params![coll.id, path_prefix],
        )?;
        Ok(removed > 0)
    }

    /// All contexts, grouped by collection.
    pub fn list_all_contexts(&self) -> Result<Vec<ContextInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, c.name, p.path_prefix, p.context, p.created_at
             FROM path_contexts p
             JOIN collections c ON c.id = p.collection_id
             ORDER BY c.name, p.path_prefix",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ContextInfo {
                id: row.get(0)?,
                collection: row.get(1)?,
                path: row.get(2)?,
                context: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Context inherited by `path`: the longest prefix `p` with
    /// `path == p` or `path` under `p/`, falling back to the empty-prefix
    /// root context. Ties go to the earliest-inserted row.
    pub fn get_context_for_path(&self, collection_id: i64, path: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT context FROM path_contexts
                 WHERE collection_id = ?1
                   AND (path_prefix = '' OR path_prefix = ?2
                        OR ?2 LIKE path_prefix || '/%')
                 ORDER BY length(path_prefix) DESC, id ASC
                 LIMIT 1",
                params![collection_id, path],
                |r| r.get(0),
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;

    const NOW: &str = "2026-01-01T00:00:00Z";

    #[test]
    fn longest_prefix_wins() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/x", "**/*.md", NOW).unwrap();
        store.add_context("x", "", "root", NOW).unwrap();
        store.add_context("x", "docs", "sub", NOW).unwrap();

        assert_eq!(
            store.get_context_for_path(coll.id, "docs/intro.md").unwrap(),
            Some("sub".to_string())
        );
        assert_eq!(
            store.get_context_for_path(coll.id, "README.md").unwrap(),
            Some("root".to_string())
        );
        // Exact prefix match also applies.
        assert_eq!(
            store.get_context_for_path(coll.id, "docs").unwrap(),
            Some("sub".to_string())
        );
    }

    #[test]
    fn prefix_must_align_with_segments() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/x", "**/*.md", NOW).unwrap();
        store.add_context("x", "docs", "sub", NOW).unwrap();

        // "docsother/..." does not live under "docs/".
        assert_eq!(
            store.get_context_for_path(coll.id, "docsother/a.md").unwrap(),
            None
        );
    }

    #[test]
    fn upsert_replaces_context_text() {
        let (store, _dir) = test_store();
        store.get_or_create_collection("/x", "**/*.md", NOW).unwrap();
        store.add_context("x", "docs", "old", NOW).unwrap();
        store.add_context("x", "docs", "new", NOW).unwrap();

        let contexts = store.list_all_contexts().unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].context, "new");
    }

    #[test]
    fn remove_reports_existence() {
        let (store, _dir) = test_store();
        store.get_or_create_collection("/x", "**/*.md", NOW).unwrap();
        store.add_context("x", "docs", "ctx", NOW).unwrap();
        assert!(store.remove_context("x", "docs").unwrap());
        assert!(!store.remove_context("x", "docs").unwrap());
    }
}
