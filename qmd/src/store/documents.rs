//! Document rows and their addressing.
//!
//! Documents are `(collection, relative path)` pairs pointing at a
//! content hash. Removal from disk soft-deletes (`active = 0`); hard
//! deletes happen only on collection removal or explicit cleanup.

use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use super::{Store, build_virtual_path, docid_from_hash};
use crate::error::Result;

/// Where a search hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Fts,
    Vec,
    Hybrid,
}

/// A resolved document, as handed to formatters and frontends.
#[derive(Debug, Clone)]
pub struct DocumentResult {
    /// Full virtual path, `qmd://{collection}/{path}`.
    pub filepath: String,
    /// Short unique human-facing path.
    pub display_path: String,
    pub title: String,
    /// Inherited folder context, if any prefix matches.
    pub context: Option<String>,
    pub hash: String,
    /// Short content address, `#` + 6 hash chars.
    pub docid: String,
    pub collection_name: String,
    pub path: String,
    pub modified_at: String,
    /// Body size in bytes, present even when `body` is not loaded.
    pub body_length: usize,
    pub body: Option<String>,
}

/// One search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub doc: DocumentResult,
    /// Positive, higher-is-better score (source-specific scale).
    pub score: f64,
    pub source: SearchSource,
    /// Character position of the best-matching chunk (vector hits).
    pub chunk_pos: Option<usize>,
}

impl Store {
    /// Insert a new active document.
    pub fn insert_document(
        &self,
        collection_id: i64,
        path: &str,
        title: &str,
        hash: &str,
        created_at: &str,
        modified_at: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO documents
                 (collection_id, path, title, hash, created_at, modified_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            params![collection_id, path, title, hash, created_at, modified_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Find an active document by its collection and path, returning
    /// `(id, hash, title)`.
    pub fn find_active_document(
        &self,
        collection_id: i64,
        path: &str,
    ) -> Result<Option<(i64, String, String)>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, hash, title FROM documents
                 WHERE collection_id = ?1 AND path = ?2 AND active = 1",
                params![collection_id, path],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?)
    }

    /// Find a document by collection and path regardless of active
    /// state, returning `(id, hash, title, active)`. Soft-deleted rows
    /// still hold their `(collection_id, path)` slot.
    pub fn find_document(
        &self,
        collection_id: i64,
        path: &str,
    ) -> Result<Option<(i64, String, String, bool)>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, hash, title, active FROM documents
                 WHERE collection_id = ?1 AND path = ?2",
                params![collection_id, path],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get::<_, i64>(3)? != 0,
                    ))
                },
            )
            .optional()?)
    }

    /// Point a document at new content.
    pub fn update_document(
        &self,
        doc_id: i64,
        title: &str,
        hash: &str,
        modified_at: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE documents SET title = ?1, hash = ?2, modified_at = ?3, active = 1
             WHERE id = ?4",
            params![title, hash, modified_at, doc_id],
        )?;
        Ok(())
    }

    /// Fix a document's title without touching its content.
    pub fn update_document_title(&self, doc_id: i64, title: &str, modified_at: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE documents SET title = ?1, modified_at = ?2 WHERE id = ?3",
            params![title, modified_at, doc_id],
        )?;
        Ok(())
    }

    /// Reactivate a soft-deleted document whose file came back.
    pub fn reactivate_document(
        &self,
        collection_id: i64,
        path: &str,
    ) -> Result<Option<(i64, String, String)>> {
        let found = self
            .conn
            .query_row(
                "SELECT id, hash, title FROM documents
                 WHERE collection_id = ?1 AND path = ?2 AND active = 0",
                params![collection_id, path],
                |r| Ok((r.get::<_, i64>(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        if let Some((id, _, _)) = found {
            self.conn
                .execute("UPDATE documents SET active = 1 WHERE id = ?1", [id])?;
        }
        Ok(found)
    }

    /// Soft-delete a document by id.
    pub fn deactivate_document(&self, doc_id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE documents SET active = 0 WHERE id = ?1", [doc_id])?;
        Ok(())
    }

    /// Paths of every active document in a collection, with their ids.
    pub fn get_active_document_paths(&self, collection_id: i64) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path FROM documents
             WHERE collection_id = ?1 AND active = 1
             ORDER BY path",
        )?;
        let rows = stmt.query_map([collection_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Fetch a document with its body and inherited context.
    pub fn get_document(
        &self,
        collection_name: &str,
        path: &str,
    ) -> Result<Option<DocumentResult>> {
        let row = self
            .conn
            .query_row(
                "SELECT d.title, d.hash, d.modified_at, co.doc, c.id
                 FROM documents d
                 JOIN collections c ON c.id = d.collection_id
                 JOIN content co ON co.hash = d.hash
                 WHERE c.name = ?1 AND d.path = ?2 AND d.active = 1",
                params![collection_name, path],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((title, hash, modified_at, body, collection_id)) = row else {
            return Ok(None);
        };

        let context = self.get_context_for_path(collection_id, path)?;
        Ok(Some(DocumentResult {
            filepath: build_virtual_path(collection_name, path),
            display_path: self.compute_display_path(collection_name, path)?,
            title,
            context,
            docid: docid_from_hash(&hash),
            hash,
            collection_name: collection_name.to_string(),
            path: path.to_string(),
            modified_at,
            body_length: body.len(),
            body: Some(body),
        }))
    }

    /// Build a document result without loading the body.
    pub(crate) fn document_result_meta(
        &self,
        collection_id: i64,
        collection_name: &str,
        path: &str,
        title: &str,
        hash: &str,
        modified_at: &str,
        body_length: usize,
    ) -> Result<DocumentResult> {
        Ok(DocumentResult {
            filepath: build_virtual_path(collection_name, path),
            display_path: self.compute_display_path(collection_name, path)?,
            title: title.to_string(),
            context: self.get_context_for_path(collection_id, path)?,
            docid: docid_from_hash(hash),
            hash: hash.to_string(),
            collection_name: collection_name.to_string(),
            path: path.to_string(),
            modified_at: modified_at.to_string(),
            body_length,
            body: None,
        })
    }

    /// Resolve a `#docid` to its `(collection, path)`.
    pub fn find_document_by_docid(&self, docid: &str) -> Result<Option<(String, String)>> {
        let prefix = docid.trim_start_matches('#');
        if prefix.is_empty() {
            return Ok(None);
        }
        Ok(self
            .conn
            .query_row(
                "SELECT c.name, d.path
                 FROM documents d
                 JOIN collections c ON c.id = d.collection_id
                 WHERE d.active = 1 AND d.hash LIKE ?1 || '%'
                 ORDER BY d.id
                 LIMIT 1",
                [prefix],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?)
    }

    /// List `(path, title, modified_at, size)` for a collection,
    /// optionally under a path prefix.
    pub fn list_files(
        &self,
        collection_name: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String, String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.path, d.title, d.modified_at, length(co.doc)
             FROM documents d
             JOIN collections c ON c.id = d.collection_id
             JOIN content co ON co.hash = d.hash
             WHERE c.name = ?1 AND d.active = 1
               AND (?2 IS NULL OR d.path = ?2 OR d.path LIKE ?2 || '/%')
             ORDER BY d.path",
        )?;
        let rows = stmt.query_map(params![collection_name, prefix], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get::<_, i64>(3)? as usize,
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Shortest unique display path for a document.
    ///
    /// Starts from `parent_dir/filename` and prepends further ancestor
    /// directories until no other active document in the collection
    /// shares the suffix, then prefixes the collection. Paths without a
    /// parent directory are shown in full. Worst case the full path is
    /// unique by the `(collection_id, path)` key.
    pub fn compute_display_path(&self, collection_name: &str, path: &str) -> Result<String> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 2 {
            return Ok(build_virtual_path(collection_name, path));
        }

        for take in 2..=segments.len() {
            let suffix = segments[segments.len() - take..].join("/");
            let clashes: i64 = self.conn.query_row(
                "SELECT COUNT(*)
                 FROM documents d
                 JOIN collections c ON c.id = d.collection_id
                 WHERE c.name = ?1 AND d.active = 1
                   AND (d.path = ?2 OR d.path LIKE '%/' || ?2)",
                params![collection_name, suffix],
                |r| r.get(0),
            )?;
            if clashes <= 1 {
                return Ok(build_virtual_path(collection_name, &suffix));
            }
        }
        Ok(build_virtual_path(collection_name, path))
    }
}

/// Active documents whose absolute path contains `query`
/// (case-insensitive), for NotFound suggestions. Limit 5.
pub fn find_similar_files(store: &Store, query: &str) -> Result<Vec<String>> {
    let needle = query.to_lowercase();
    let mut stmt = store.conn.prepare(
        "SELECT c.name, d.path, c.pwd
         FROM documents d
         JOIN collections c ON c.id = d.collection_id
         WHERE d.active = 1
         ORDER BY c.name, d.path",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
        ))
    })?;

    let mut similar = Vec::new();
    for row in rows {
        let (collection, path, pwd) = row?;
        let absolute = format!("{pwd}/{path}");
        if absolute.to_lowercase().contains(&needle)
            || build_virtual_path(&collection, &path)
                .to_lowercase()
                .contains(&needle)
        {
            similar.push(build_virtual_path(&collection, &path));
            if similar.len() >= 5 {
                break;
            }
        }
    }
    Ok(similar)
}

/// Match active documents against a glob over `{collection}/{path}`.
///
/// Accepts `qmd://` prefixed patterns; a pattern without a slash matches
/// within every collection.
pub fn match_files_by_glob(store: &Store, pattern: &str) -> Result<Vec<DocumentResult>> {
    let stripped = pattern.strip_prefix("qmd://").unwrap_or(pattern);
    let matcher = glob::Pattern::new(stripped)?;
    let bare_matcher = if stripped.contains('/') {
        None
    } else {
        // "*.md" should match files in any collection.
        Some(glob::Pattern::new(&format!("*/{stripped}"))?)
    };
    let options = glob::MatchOptions {
        require_literal_separator: true,
        ..Default::default()
    };

    let mut stmt = store.conn.prepare(
        "SELECT c.id, c.name, d.path, d.title, d.hash, d.modified_at, length(co.doc)
         FROM documents d
         JOIN collections c ON c.id = d.collection_id
         JOIN content co ON co.hash = d.hash
         WHERE d.active = 1
         ORDER BY c.name, d.path",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, i64>(6)? as usize,
        ))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (coll_id, coll_name, path, title, hash, modified_at, size) = row?;
        let candidate = format!("{coll_name}/{path}");
        if matcher.matches_with(&candidate, options)
            || bare_matcher
                .as_ref()
                .is_some_and(|m| m.matches_with(&candidate, options))
        {
            results.push(store.document_result_meta(
                coll_id, &coll_name, &path, &title, &hash, &modified_at, size,
            )?);
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::super::{Store, test_store};
    use super::*;

    const NOW: &str = "2026-01-01T00:00:00Z";

    fn seed_doc(store: &Store, coll_id: i64, path: &str, body: &str) -> String {
        let hash = Store::hash_content(body);
        store.insert_content(&hash, body, NOW).unwrap();
        let title = Store::extract_title(body).unwrap_or_else(|| path.to_string());
        store
            .insert_document(coll_id, path, &title, &hash, NOW, NOW)
            .unwrap();
        hash
    }

    #[test]
    fn get_document_resolves_body_and_context() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        seed_doc(&store, coll.id, "docs/intro.md", "# Intro\nhello");
        store.add_context("repo", "docs", "documentation", NOW).unwrap();

        let doc = store.get_document("repo", "docs/intro.md").unwrap().unwrap();
        assert_eq!(doc.title, "Intro");
        assert_eq!(doc.filepath, "qmd://repo/docs/intro.md");
        assert_eq!(doc.context, Some("documentation".to_string()));
        assert_eq!(doc.body.as_deref(), Some("# Intro\nhello"));
        assert_eq!(doc.body_length, 14);

        assert!(store.get_document("repo", "missing.md").unwrap().is_none());
    }

    #[test]
    fn content_dedup_across_documents() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        seed_doc(&store, coll.id, "a.md", "same bytes");
        seed_doc(&store, coll.id, "b.md", "same bytes");

        let content_rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM content", [], |r| r.get(0))
            .unwrap();
        let doc_rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))
            .unwrap();
        assert_eq!(content_rows, 1);
        assert_eq!(doc_rows, 2);
        assert_eq!(store.cleanup_orphaned_content().unwrap(), 0);
    }

    #[test]
    fn docid_resolution() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        let hash = seed_doc(&store, coll.id, "note.md", "# Note\nbody");

        let docid = docid_from_hash(&hash);
        let (c, p) = store.find_document_by_docid(&docid).unwrap().unwrap();
        assert_eq!(c, "repo");
        assert_eq!(p, "note.md");
        assert!(store.find_document_by_docid("#000000").unwrap().is_none());
    }

    #[test]
    fn display_path_shortens_until_unique() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        seed_doc(&store, coll.id, "guides/setup.md", "# One\n");
        seed_doc(&store, coll.id, "reference/setup.md", "# Two\n");
        seed_doc(&store, coll.id, "unique.md", "# Three\n");
        seed_doc(&store, coll.id, "folder/onlyone.md", "# Four\n");
        seed_doc(&store, coll.id, "a/b/deep.md", "# Five\n");

        assert_eq!(
            store.compute_display_path("repo", "unique.md").unwrap(),
            "qmd://repo/unique.md"
        );
        // "setup.md" is ambiguous, so the parent directory comes in.
        assert_eq!(
            store.compute_display_path("repo", "guides/setup.md").unwrap(),
            "qmd://repo/guides/setup.md"
        );
        // Even an unambiguous filename keeps its parent directory.
        assert_eq!(
            store.compute_display_path("repo", "folder/onlyone.md").unwrap(),
            "qmd://repo/folder/onlyone.md"
        );
        // Deeper paths still shrink to the two-segment floor.
        assert_eq!(
            store.compute_display_path("repo", "a/b/deep.md").unwrap(),
            "qmd://repo/b/deep.md"
        );
    }

    #[test]
    fn deactivate_then_cleanup_removes_content() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        let hash = seed_doc(&store, coll.id, "x.md", "# X\n");
        let (doc_id, _, _) = store.find_active_document(coll.id, "x.md").unwrap().unwrap();

        store.deactivate_document(doc_id).unwrap();
        assert_eq!(store.cleanup_orphaned_content().unwrap(), 1);
        assert_eq!(store.get_content(&hash).unwrap(), None);
        // The soft-deleted row itself is still there.
        let inactive: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM documents WHERE active = 0", [], |r| r.get(0))
            .unwrap();
        assert_eq!(inactive, 1);
    }

    #[test]
    fn glob_matching_across_collections() {
        let (store, _dir) = test_store();
        let a = store.get_or_create_collection("/a/wiki", "**/*.md", NOW).unwrap();
        let b = store.get_or_create_collection("/b/docs", "**/*.md", NOW).unwrap();
        seed_doc(&store, a.id, "intro.md", "# A\n");
        seed_doc(&store, b.id, "guide/intro.md", "# B\n");

        let hits = match_files_by_glob(&store, "wiki/*.md").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].collection_name, "wiki");

        let all = match_files_by_glob(&store, "qmd://*/**/*.md").unwrap();
        assert!(all.len() >= 1);

        let bare = match_files_by_glob(&store, "*.md").unwrap();
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].path, "intro.md");
    }

    #[test]
    fn similar_files_are_case_insensitive_and_capped() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        for i in 0..8 {
            seed_doc(&store, coll.id, &format!("notes/meeting-{i}.md"), &format!("# M{i}\n"));
        }

        let similar = find_similar_files(&store, "MEETING").unwrap();
        assert_eq!(similar.len(), 5);
        assert!(similar[0].contains("meeting-0.md"));
    }
}
