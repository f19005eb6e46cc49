//! Full-text search over the FTS5 mirror.
//!
//! The mirror is trigger-maintained: every insert, update, and delete on
//! `documents` rewrites the matching `documents_fts` row, so the two never
//! drift inside a transaction.

use rusqlite::params;

use super::{SearchResult, SearchSource, Store};
use crate::error::Result;

/// Sanitize one query token: lowercase, keep letters, digits, and
/// apostrophes.
fn sanitize_token(token: &str) -> String {
    token
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '\'')
        .collect()
}

/// Tokenize a user query for matching and snippets.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(sanitize_token)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Build the FTS5 match expression: every sanitized token quoted,
/// prefix-starred, and AND-joined. `None` when nothing survives.
pub fn build_match_query(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\"*"))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

impl Store {
    /// BM25-ranked full-text search.
    ///
    /// Path matches weigh 10x body matches. Raw BM25 is negative with
    /// smaller meaning better; hits carry the absolute value so larger is
    /// better downstream.
    pub fn search_fts(
        &self,
        query: &str,
        limit: usize,
        collection: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let Some(match_query) = build_match_query(query) else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.name, d.path, d.title, d.hash, d.modified_at,
                    length(co.doc), bm25(documents_fts, 10.0, 1.0) AS score
             FROM documents_fts
             JOIN documents d ON d.id = documents_fts.rowid
             JOIN collections c ON c.id = d.collection_id
             JOIN content co ON co.hash = d.hash
             WHERE documents_fts MATCH ?1
               AND d.active = 1
               AND (?2 IS NULL OR c.name = ?2)
             ORDER BY score
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![match_query, collection, limit as i64], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, i64>(6)? as usize,
                r.get::<_, f64>(7)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (coll_id, coll_name, path, title, hash, modified_at, size, raw_score) = row?;
            let doc = self.document_result_meta(
                coll_id, &coll_name, &path, &title, &hash, &modified_at, size,
            )?;
            results.push(SearchResult {
                doc,
                score: raw_score.abs(),
                source: SearchSource::Fts,
                chunk_pos: None,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Store, test_store};
    use super::*;

    const NOW: &str = "2026-01-01T00:00:00Z";

    fn seed(store: &Store, coll_id: i64, path: &str, body: &str) {
        let hash = Store::hash_content(body);
        store.insert_content(&hash, body, NOW).unwrap();
        let title = Store::extract_title(body).unwrap_or_else(|| path.to_string());
        store.insert_document(coll_id, path, &title, &hash, NOW, NOW).unwrap();
    }

    #[test]
    fn match_query_construction() {
        assert_eq!(build_match_query("hello"), Some("\"hello\"*".to_string()));
        assert_eq!(
            build_match_query("Quick Brown-Fox!"),
            Some("\"quick\"* AND \"brownfox\"*".to_string())
        );
        assert_eq!(build_match_query("  "), None);
        assert_eq!(build_match_query("!!! ???"), None);
    }

    #[test]
    fn indexed_document_is_searchable() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        seed(&store, coll.id, "notes.md", "# Title\nthe quick brown fox");

        let hits = store.search_fts("quick", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.display_path, "qmd://repo/notes.md");
        assert_eq!(hits[0].doc.title, "Title");
        assert!(hits[0].score > 0.0);
        assert_eq!(hits[0].source, SearchSource::Fts);
    }

    #[test]
    fn prefix_match_applies() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        seed(&store, coll.id, "a.md", "# Doc\nsearchable content");

        assert_eq!(store.search_fts("searcha", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn empty_query_returns_empty() {
        let (store, _dir) = test_store();
        assert!(store.search_fts("  ", 10, None).unwrap().is_empty());
    }

    #[test]
    fn collection_filter_applies() {
        let (store, _dir) = test_store();
        let a = store.get_or_create_collection("/a/one", "**/*.md", NOW).unwrap();
        let b = store.get_or_create_collection("/b/two", "**/*.md", NOW).unwrap();
        seed(&store, a.id, "a.md", "shared keyword alpha");
        seed(&store, b.id, "b.md", "shared keyword beta");

        assert_eq!(store.search_fts("keyword", 10, None).unwrap().len(), 2);
        let only_a = store.search_fts("keyword", 10, Some("one")).unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].doc.collection_name, "one");
        // Unknown collection filters everything out.
        assert!(store.search_fts("keyword", 10, Some("ghost")).unwrap().is_empty());
    }

    #[test]
    fn fts_mirror_follows_document_lifecycle() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        seed(&store, coll.id, "doc.md", "# V1\noriginal wording");

        // Update rewrites the mirror.
        let new_body = "# V2\nrevised wording";
        let new_hash = Store::hash_content(new_body);
        store.insert_content(&new_hash, new_body, NOW).unwrap();
        let (doc_id, _, _) = store.find_active_document(coll.id, "doc.md").unwrap().unwrap();
        store.update_document(doc_id, "V2", &new_hash, NOW).unwrap();

        assert!(store.search_fts("original", 10, None).unwrap().is_empty());
        assert_eq!(store.search_fts("revised", 10, None).unwrap().len(), 1);

        // One mirror row per document.
        let fts_rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM documents_fts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fts_rows, 1);

        // Hard delete clears it.
        store.conn.execute("DELETE FROM documents WHERE id = ?1", [doc_id]).unwrap();
        let fts_rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM documents_fts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fts_rows, 0);
    }

    #[test]
    fn path_matches_outrank_body_matches() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        seed(&store, coll.id, "deploy.md", "# Guide\nnothing relevant here");
        seed(&store, coll.id, "other.md", "# Other\nmentions deploy once in the body");

        let hits = store.search_fts("deploy", 10, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc.path, "deploy.md");
    }
}
