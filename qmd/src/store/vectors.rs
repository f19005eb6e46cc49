//! Vector storage and KNN search.
//!
//! Chunk embeddings live in two places that must stay paired: the
//! `content_vectors` bookkeeping table keyed by `(hash, seq)`, and the
//! `vectors_vec` vec0 virtual table keyed by `"{hash}_{seq}"`. The vec0
//! table is created on first embedding, locking the dimension.

use rusqlite::{OptionalExtension, params};
use zerocopy::AsBytes;

use super::{SearchResult, SearchSource, Store, build_virtual_path};
use crate::error::{QmdError, Result};

/// A raw KNN match before document grouping.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub hash: String,
    pub seq: usize,
    /// Character position of the chunk in its document body.
    pub pos: usize,
    pub model: String,
    pub distance: f64,
}

impl Store {
    /// Whether the vec0 table exists.
    pub fn has_vector_table(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'vectors_vec'",
            [],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Dimension of the existing vec0 table, parsed from its DDL.
    fn vector_table_dimension(&self) -> Result<Option<usize>> {
        let sql: Option<String> = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'vectors_vec'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(sql.as_deref().and_then(parse_vec_dimension))
    }

    /// Create the vec0 table sized to `dims`, dropping and recreating it
    /// when an existing table has a different dimension (callers must
    /// re-embed after such a reset).
    pub fn ensure_vector_table(&self, dims: usize) -> Result<()> {
        if dims == 0 {
            return Err(QmdError::State("embedding dimension is zero".to_string()));
        }

        if self.has_vector_table()? {
            match self.vector_table_dimension()? {
                Some(existing) if existing == dims => return Ok(()),
                _ => {
                    self.conn.execute_batch("DROP TABLE vectors_vec")?;
                }
            }
        }

        self.conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE vectors_vec USING vec0(
                hash_seq TEXT PRIMARY KEY,
                embedding float[{dims}]
            )"
        ))?;
        Ok(())
    }

    /// Persist one chunk embedding into both tables.
    pub fn insert_embedding(
        &self,
        hash: &str,
        seq: usize,
        pos: usize,
        embedding: &[f32],
        model: &str,
        embedded_at: &str,
    ) -> Result<()> {
        let hash_seq = format!("{hash}_{seq}");
        self.conn.execute(
            "INSERT OR REPLACE INTO content_vectors (hash, seq, pos, model, embedded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![hash, seq as i64, pos as i64, model, embedded_at],
        )?;
        self.conn.execute(
            "DELETE FROM vectors_vec WHERE hash_seq = ?1",
            [&hash_seq],
        )?;
        self.conn.execute(
            "INSERT INTO vectors_vec (hash_seq, embedding) VALUES (?1, ?2)",
            params![hash_seq, embedding.as_bytes()],
        )?;
        Ok(())
    }

    /// Raw KNN search, joined to the chunk bookkeeping.
    pub fn search_vectors(
        &self,
        embedding: &[f32],
        k: usize,
        collection: Option<&str>,
    ) -> Result<Vec<VectorMatch>> {
        if !self.has_vector_table()? {
            return Ok(Vec::new());
        }
        // vec0 MATCH errors out on an empty table.
        let populated: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vectors_vec", [], |r| r.get(0))?;
        if populated == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT cv.hash, cv.seq, cv.pos, cv.model, v.distance
             FROM vectors_vec v
             JOIN content_vectors cv ON cv.hash || '_' || cv.seq = v.hash_seq
             WHERE v.embedding MATCH ?1 AND k = ?2
             ORDER BY v.distance",
        )?;
        let rows = stmt.query_map(params![embedding.as_bytes(), k as i64], |r| {
            Ok(VectorMatch {
                hash: r.get(0)?,
                seq: r.get::<_, i64>(1)? as usize,
                pos: r.get::<_, i64>(2)? as usize,
                model: r.get(3)?,
                distance: r.get(4)?,
            })
        })?;
        let matches = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        if collection.is_none() {
            return Ok(matches);
        }

        // Keep only hashes with an active document in the collection.
        let mut filtered = Vec::new();
        for m in matches {
            let visible: i64 = self.conn.query_row(
                "SELECT COUNT(*)
                 FROM documents d
                 JOIN collections c ON c.id = d.collection_id
                 WHERE d.hash = ?1 AND d.active = 1 AND c.name = ?2",
                params![m.hash, collection],
                |r| r.get(0),
            )?;
            if visible > 0 {
                filtered.push(m);
            }
        }
        Ok(filtered)
    }

    /// Document-level vector search.
    ///
    /// Runs KNN with `limit * 3` candidates, keeps the best chunk per
    /// document, and converts distance into `1 / (1 + d)` so larger means
    /// closer.
    pub fn search_vec(
        &self,
        embedding: &[f32],
        limit: usize,
        collection: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let matches = self.search_vectors(embedding, limit * 3, collection)?;
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        // Best (smallest distance) chunk per addressable document, in
        // discovery order.
        let mut best: Vec<(String, String, VectorMatch)> = Vec::new();
        for m in matches {
            for (coll_name, path) in self.active_documents_for_hash(&m.hash, collection)? {
                let key = build_virtual_path(&coll_name, &path);
                match best.iter_mut().find(|(k, _, _)| *k == key) {
                    Some((_, _, existing)) => {
                        if m.distance < existing.distance {
                            *existing = m.clone();
                        }
                    }
                    None => best.push((key, coll_name, m.clone())),
                }
            }
        }

        best.sort_by(|a, b| {
            a.2.distance
                .partial_cmp(&b.2.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        best.truncate(limit);

        let mut results = Vec::new();
        for (_, coll_name, m) in best {
            let row = self
                .conn
                .query_row(
                    "SELECT c.id, d.path, d.title, d.modified_at, length(co.doc)
                     FROM documents d
                     JOIN collections c ON c.id = d.collection_id
                     JOIN content co ON co.hash = d.hash
                     WHERE d.hash = ?1 AND d.active = 1 AND c.name = ?2
                     ORDER BY d.id LIMIT 1",
                    params![m.hash, coll_name],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, String>(3)?,
                            r.get::<_, i64>(4)? as usize,
                        ))
                    },
                )
                .optional()?;
            let Some((coll_id, path, title, modified_at, size)) = row else {
                continue;
            };
            let doc = self.document_result_meta(
                coll_id, &coll_name, &path, &title, &m.hash, &modified_at, size,
            )?;
            results.push(SearchResult {
                doc,
                score: 1.0 / (1.0 + m.distance),
                source: SearchSource::Vec,
                chunk_pos: Some(m.pos),
            });
        }
        Ok(results)
    }

    /// `(collection, path)` of every active document sharing `hash`,
    /// optionally restricted to one collection.
    fn active_documents_for_hash(
        &self,
        hash: &str,
        collection: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.name, d.path
             FROM documents d
             JOIN collections c ON c.id = d.collection_id
             WHERE d.hash = ?1 AND d.active = 1
               AND (?2 IS NULL OR c.name = ?2)
             ORDER BY d.id",
        )?;
        let rows = stmt.query_map(params![hash, collection], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Hashes with at least one active document but no `seq = 0` vector
    /// for `model`. Returns `(hash, representative path, body)`.
    pub fn get_hashes_needing_embedding(
        &self,
        model: &str,
    ) -> Result<Vec<(String, String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.hash, MIN(d.path), c.doc
             FROM content c
             JOIN documents d ON d.hash = c.hash AND d.active = 1
             LEFT JOIN content_vectors cv
                 ON cv.hash = c.hash AND cv.seq = 0 AND cv.model = ?1
             WHERE cv.hash IS NULL
             GROUP BY c.hash
             ORDER BY MIN(d.path)",
        )?;
        let rows = stmt.query_map([model], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Drop every embedding and the vec0 table. Returns how many chunk
    /// vectors were removed.
    pub fn clear_embeddings(&self) -> Result<usize> {
        let cleared = self.conn.execute("DELETE FROM content_vectors", [])?;
        if self.has_vector_table()? {
            self.conn.execute_batch("DROP TABLE vectors_vec")?;
        }
        Ok(cleared)
    }

    /// Remove vectors whose hash no longer has an active document,
    /// keeping both tables paired.
    pub fn cleanup_orphaned_vectors(&self) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT hash, seq FROM content_vectors
             WHERE hash NOT IN (SELECT hash FROM documents WHERE active = 1)",
        )?;
        let orphans: Vec<(String, i64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let has_vec = self.has_vector_table()?;
        for (hash, seq) in &orphans {
            if has_vec {
                self.conn.execute(
                    "DELETE FROM vectors_vec WHERE hash_seq = ?1",
                    [format!("{hash}_{seq}")],
                )?;
            }
            self.conn.execute(
                "DELETE FROM content_vectors WHERE hash = ?1 AND seq = ?2",
                params![hash, seq],
            )?;
        }
        Ok(orphans.len())
    }
}

/// Pull the dimension out of a `float[N]` column in vec0 DDL.
fn parse_vec_dimension(sql: &str) -> Option<usize> {
    let start = sql.find("float[")? + "float[".len();
    let end = sql[start..].find(']')? + start;
    sql[start..end].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::super::{Store, test_store};
    use super::*;

    const NOW: &str = "2026-01-01T00:00:00Z";

    fn seed(store: &Store, coll_id: i64, path: &str, body: &str) -> String {
        let hash = Store::hash_content(body);
        store.insert_content(&hash, body, NOW).unwrap();
        store.insert_document(coll_id, path, path, &hash, NOW, NOW).unwrap();
        hash
    }

    #[test]
    fn dimension_parse() {
        assert_eq!(
            parse_vec_dimension("CREATE VIRTUAL TABLE vectors_vec USING vec0(hash_seq TEXT PRIMARY KEY, embedding float[768])"),
            Some(768)
        );
        assert_eq!(parse_vec_dimension("no vector column"), None);
    }

    #[test]
    fn ensure_table_locks_dimension() {
        let (store, _dir) = test_store();
        assert!(!store.has_vector_table().unwrap());
        store.ensure_vector_table(4).unwrap();
        assert!(store.has_vector_table().unwrap());
        // Same dimension is a no-op.
        store.ensure_vector_table(4).unwrap();
        // Different dimension drops and recreates.
        store.ensure_vector_table(8).unwrap();
        assert_eq!(store.vector_table_dimension().unwrap(), Some(8));
    }

    #[test]
    fn paired_rows_and_knn_search() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        let h1 = seed(&store, coll.id, "a.md", "alpha body");
        let h2 = seed(&store, coll.id, "b.md", "beta body");

        store.ensure_vector_table(4).unwrap();
        store.insert_embedding(&h1, 0, 0, &[1.0, 0.0, 0.0, 0.0], "m", NOW).unwrap();
        store.insert_embedding(&h2, 0, 0, &[0.0, 1.0, 0.0, 0.0], "m", NOW).unwrap();

        let hits = store.search_vec(&[1.0, 0.0, 0.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc.path, "a.md");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].source, SearchSource::Vec);
        assert_eq!(hits[0].chunk_pos, Some(0));
        // Exact match: distance 0, score 1.
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn best_chunk_per_document_wins() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        let h = seed(&store, coll.id, "long.md", "long body");

        store.ensure_vector_table(4).unwrap();
        store.insert_embedding(&h, 0, 0, &[0.0, 1.0, 0.0, 0.0], "m", NOW).unwrap();
        store.insert_embedding(&h, 1, 5000, &[1.0, 0.0, 0.0, 0.0], "m", NOW).unwrap();

        let hits = store.search_vec(&[1.0, 0.0, 0.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        // The closer chunk (seq 1) provides the position.
        assert_eq!(hits[0].chunk_pos, Some(5000));
    }

    #[test]
    fn collection_filter_restricts_hits() {
        let (store, _dir) = test_store();
        let a = store.get_or_create_collection("/a/one", "**/*.md", NOW).unwrap();
        let b = store.get_or_create_collection("/b/two", "**/*.md", NOW).unwrap();
        let h1 = seed(&store, a.id, "a.md", "one body");
        let h2 = seed(&store, b.id, "b.md", "two body");

        store.ensure_vector_table(4).unwrap();
        store.insert_embedding(&h1, 0, 0, &[1.0, 0.0, 0.0, 0.0], "m", NOW).unwrap();
        store.insert_embedding(&h2, 0, 0, &[0.9, 0.1, 0.0, 0.0], "m", NOW).unwrap();

        let hits = store.search_vec(&[1.0, 0.0, 0.0, 0.0], 10, Some("two")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.collection_name, "two");
        assert!(store.search_vec(&[1.0, 0.0, 0.0, 0.0], 10, Some("ghost")).unwrap().is_empty());
    }

    #[test]
    fn missing_table_returns_empty() {
        let (store, _dir) = test_store();
        assert!(store.search_vec(&[1.0, 0.0], 10, None).unwrap().is_empty());
    }

    #[test]
    fn pending_hashes_respect_model() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        let h = seed(&store, coll.id, "a.md", "body text");

        assert_eq!(store.get_hashes_needing_embedding("m").unwrap().len(), 1);
        store.ensure_vector_table(4).unwrap();
        store.insert_embedding(&h, 0, 0, &[0.0; 4], "m", NOW).unwrap();
        assert!(store.get_hashes_needing_embedding("m").unwrap().is_empty());
        // A different model still needs work.
        assert_eq!(store.get_hashes_needing_embedding("other").unwrap().len(), 1);
    }

    #[test]
    fn orphan_sweep_keeps_tables_paired() {
        let (store, _dir) = test_store();
        let coll = store.get_or_create_collection("/repo", "**/*.md", NOW).unwrap();
        let h = seed(&store, coll.id, "a.md", "body");
        store.ensure_vector_table(4).unwrap();
        store.insert_embedding(&h, 0, 0, &[0.0; 4], "m", NOW).unwrap();

        let (doc_id, _, _) = store.find_active_document(coll.id, "a.md").unwrap().unwrap();
        store.deactivate_document(doc_id).unwrap();

        assert_eq!(store.cleanup_orphaned_vectors().unwrap(), 1);
        assert_eq!(store.cleanup_orphaned_vectors().unwrap(), 0);
        let cv: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM content_vectors", [], |r| r.get(0))
            .unwrap();
        let vv: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM vectors_vec", [], |r| r.get(0))
            .unwrap();
        assert_eq!(cv, 0);
        assert_eq!(vv, 0);
    }
}
