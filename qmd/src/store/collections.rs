//! Collection rows: a named `(pwd, glob)` pair documents hang off.

use rusqlite::{OptionalExtension, params};

use super::Store;
use crate::error::{QmdError, Result};

/// A collection with its document stats.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub id: i64,
    pub name: String,
    /// Canonical absolute root directory.
    pub pwd: String,
    pub glob_pattern: String,
    pub created_at: String,
    pub updated_at: String,
    pub active_count: usize,
    /// Most recent document modification, if any documents exist.
    pub last_modified: Option<String>,
}

const COLLECTION_COLUMNS: &str = "c.id, c.name, c.pwd, c.glob_pattern, c.created_at, c.updated_at,
    (SELECT COUNT(*) FROM documents d WHERE d.collection_id = c.id AND d.active = 1),
    (SELECT MAX(d.modified_at) FROM documents d WHERE d.collection_id = c.id AND d.active = 1)";

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionInfo> {
    Ok(CollectionInfo {
        id: row.get(0)?,
        name: row.get(1)?,
        pwd: row.get(2)?,
        glob_pattern: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        active_count: row.get::<_, i64>(6)? as usize,
        last_modified: row.get(7)?,
    })
}

impl Store {
    /// Look up a collection by name.
    pub fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {COLLECTION_COLUMNS} FROM collections c WHERE c.name = ?1"),
                [name],
                row_to_collection,
            )
            .optional()?)
    }

    /// Look up a collection by its `(pwd, glob)` key.
    pub fn find_collection_by_source(
        &self,
        pwd: &str,
        glob_pattern: &str,
    ) -> Result<Option<CollectionInfo>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {COLLECTION_COLUMNS} FROM collections c
                     WHERE c.pwd = ?1 AND c.glob_pattern = ?2"
                ),
                params![pwd, glob_pattern],
                row_to_collection,
            )
            .optional()?)
    }

    /// All collections, alphabetically.
    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections c ORDER BY c.name"
        ))?;
        let rows = stmt.query_map([], row_to_collection)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Get the collection for `(pwd, glob)`, creating it when absent.
    ///
    /// New collections are named after the basename of `pwd`; a taken name
    /// gets `-2`, `-3`, … appended until it is unique.
    pub fn get_or_create_collection(
        &self,
        pwd: &str,
        glob_pattern: &str,
        now: &str,
    ) -> Result<CollectionInfo> {
        if let Some(existing) = self.find_collection_by_source(pwd, glob_pattern)? {
            return Ok(existing);
        }

        let base = std::path::Path::new(pwd)
            .file_name()
            .map_or_else(|| "root".to_string(), |s| s.to_string_lossy().to_string());
        let name = self.unique_collection_name(&base)?;
        self.create_collection(&name, pwd, glob_pattern, now)
    }

    /// Smallest `-N` suffix (starting at 2) making `base` unique.
    fn unique_collection_name(&self, base: &str) -> Result<String> {
        if self.get_collection(base)?.is_none() {
            return Ok(base.to_string());
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{base}-{n}");
            if self.get_collection(&candidate)?.is_none() {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Create a collection, validating both unique keys up front.
    pub fn create_collection(
        &self,
        name: &str,
        pwd: &str,
        glob_pattern: &str,
        now: &str,
    ) -> Result<CollectionInfo> {
        if self.get_collection(name)?.is_some() {
            return Err(QmdError::Validation(format!(
                "collection name already exists: {name}"
            )));
        }
        if self.find_collection_by_source(pwd, glob_pattern)?.is_some() {
            return Err(QmdError::Validation(format!(
                "collection already indexes {pwd} with pattern {glob_pattern}"
            )));
        }

        self.conn.execute(
            "INSERT INTO collections (name, pwd, glob_pattern, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![name, pwd, glob_pattern, now],
        )?;

        self.get_collection(name)?
            .ok_or_else(|| QmdError::State("collection vanished after insert".to_string()))
    }

    /// Rename a collection. Fails without mutation when `old` is missing
    /// or `new` is taken.
    pub fn rename_collection(&self, old: &str, new: &str) -> Result<()> {
        if self.get_collection(new)?.is_some() {
            return Err(QmdError::Validation(format!(
                "collection name already exists: {new}"
            )));
        }
        let changed = self.conn.execute(
            "UPDATE collections SET name = ?1 WHERE name = ?2",
            params![new, old],
        )?;
        if changed == 0 {
            return Err(QmdError::not_found("collection", old));
        }
        Ok(())
    }

    /// Remove a collection with its documents and contexts, then sweep
    /// orphaned content. Returns `(documents deleted, content removed)`.
    pub fn remove_collection(&self, name: &str) -> Result<(usize, usize)> {
        let coll = self
            .get_collection(name)?
            .ok_or_else(|| QmdError::not_found("collection", name))?;

        // Explicit deletes so the FTS delete trigger fires per document.
        let docs = self.conn.execute(
            "DELETE FROM documents WHERE collection_id = ?1",
            [coll.id],
        )?;
        self.conn.execute(
            "DELETE FROM path_contexts WHERE collection_id = ?1",
            [coll.id],
        )?;
        self.conn
            .execute("DELETE FROM collections WHERE id = ?1", [coll.id])?;

        let orphans = self.cleanup_orphaned_content()?;
        Ok((docs, orphans))
    }

    /// Bump a collection's `updated_at`.
    pub fn touch_collection(&self, id: i64, now: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE collections SET updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Store, test_store};
    use crate::error::QmdError;

    const NOW: &str = "2026-01-01T00:00:00Z";

    #[test]
    fn get_or_create_names_from_basename() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/home/me/wiki", "**/*.md", NOW).unwrap();
        assert_eq!(coll.name, "wiki");

        // Same key returns the same row.
        let again = store.get_or_create_collection("/home/me/wiki", "**/*.md", NOW).unwrap();
        assert_eq!(again.id, coll.id);
    }

    #[test]
    fn name_collisions_get_numeric_suffixes() {
        let (store, _dir) = test_store();
        let a = store.get_or_create_collection("/a/notes", "**/*.md", NOW).unwrap();
        let b = store.get_or_create_collection("/b/notes", "**/*.md", NOW).unwrap();
        let c = store.get_or_create_collection("/c/notes", "**/*.md", NOW).unwrap();
        assert_eq!(a.name, "notes");
        assert_eq!(b.name, "notes-2");
        assert_eq!(c.name, "notes-3");
    }

    #[test]
    fn rename_to_existing_fails_without_mutation() {
        let (store, _dir) = test_store();
        store.get_or_create_collection("/x/alpha", "**/*.md", NOW).unwrap();
        store.get_or_create_collection("/x/beta", "**/*.md", NOW).unwrap();

        let err = store.rename_collection("alpha", "beta").unwrap_err();
        assert!(matches!(err, QmdError::Validation(_)));
        assert!(store.get_collection("alpha").unwrap().is_some());
        assert!(store.get_collection("beta").unwrap().is_some());
    }

    #[test]
    fn rename_missing_is_not_found() {
        let (store, _dir) = test_store();
        let err = store.rename_collection("ghost", "anything").unwrap_err();
        assert!(matches!(err, QmdError::NotFound { .. }));
    }

    #[test]
    fn remove_cascades_documents_and_content() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        let hash = Store::hash_content("body");
        store.insert_content(&hash, "body", NOW).unwrap();
        store.insert_document(coll.id, "a.md", "A", &hash, NOW, NOW).unwrap();

        let (docs, orphans) = store.remove_collection("repo").unwrap();
        assert_eq!(docs, 1);
        assert_eq!(orphans, 1);
        assert!(store.get_collection("repo").unwrap().is_none());
    }
}
