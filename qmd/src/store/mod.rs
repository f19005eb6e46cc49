//! Embedded storage for collections, documents, and vectors.
//!
//! One SQLite file holds everything: content-addressed bodies, document
//! and collection metadata, path contexts, the FTS5 mirror, the vec0 KNN
//! table, and the LLM response cache. The connection is single-threaded;
//! long-lived services keep one `Store` for their lifetime.

pub mod cache;
pub mod collections;
pub mod content;
pub mod contexts;
pub mod documents;
pub mod fts;
mod migration;
pub mod vectors;

pub use collections::CollectionInfo;
pub use contexts::ContextInfo;
pub use documents::{DocumentResult, SearchResult, SearchSource, find_similar_files, match_files_by_glob};

use std::path::{Path, PathBuf};
use std::sync::Once;

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::config;
use crate::error::Result;

/// Registers the sqlite-vec extension once per process, before the first
/// connection opens.
static VEC_INIT: Once = Once::new();

fn register_vec_extension() {
    VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init is the extension entry point exported by
        // the sqlite-vec crate; sqlite3_auto_extension expects the generic
        // extension init signature. This is the documented registration
        // pattern for rusqlite.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut std::os::raw::c_char,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> std::os::raw::c_int,
            >(sqlite_vec::sqlite3_vec_init as *const ())));
        }
    });
}

/// Handle to the qmd database.
pub struct Store {
    pub(crate) conn: Connection,
    db_path: PathBuf,
}

impl Store {
    /// Open the default database (honoring `QMD_INDEX_PATH`).
    pub fn new() -> Result<Self> {
        Self::open(&config::get_db_path())
    }

    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        register_vec_extension();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;

        migration::migrate_legacy_schema(&conn)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn,
            db_path: path.to_path_buf(),
        })
    }

    /// Path of the open database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS content (
                hash TEXT PRIMARY KEY,
                doc TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                pwd TEXT NOT NULL,
                glob_pattern TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (pwd, glob_pattern)
            );

            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id INTEGER NOT NULL
                    REFERENCES collections(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                title TEXT NOT NULL,
                hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                UNIQUE (collection_id, path)
            );

            CREATE TABLE IF NOT EXISTS path_contexts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id INTEGER NOT NULL
                    REFERENCES collections(id) ON DELETE CASCADE,
                path_prefix TEXT NOT NULL,
                context TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (collection_id, path_prefix)
            );

            CREATE TABLE IF NOT EXISTS content_vectors (
                hash TEXT NOT NULL,
                seq INTEGER NOT NULL,
                pos INTEGER NOT NULL DEFAULT 0,
                model TEXT NOT NULL,
                embedded_at TEXT NOT NULL,
                PRIMARY KEY (hash, seq)
            );

            CREATE TABLE IF NOT EXISTS ollama_cache (
                hash TEXT PRIMARY KEY,
                result TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection_active
                ON documents(collection_id, active);
            CREATE INDEX IF NOT EXISTS idx_documents_hash
                ON documents(hash);
            CREATE INDEX IF NOT EXISTS idx_documents_path_active
                ON documents(path, active);
            CREATE INDEX IF NOT EXISTS idx_path_contexts_prefix
                ON path_contexts(collection_id, path_prefix);

            CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts
                USING fts5(path, body, tokenize='porter unicode61');

            CREATE TRIGGER IF NOT EXISTS documents_fts_insert
            AFTER INSERT ON documents BEGIN
                INSERT INTO documents_fts(rowid, path, body)
                VALUES (
                    new.id,
                    new.path,
                    (SELECT doc FROM content WHERE hash = new.hash)
                );
            END;

            CREATE TRIGGER IF NOT EXISTS documents_fts_delete
            AFTER DELETE ON documents BEGIN
                DELETE FROM documents_fts WHERE rowid = old.id;
            END;

            CREATE TRIGGER IF NOT EXISTS documents_fts_update
            AFTER UPDATE ON documents BEGIN
                DELETE FROM documents_fts WHERE rowid = old.id;
                INSERT INTO documents_fts(rowid, path, body)
                VALUES (
                    new.id,
                    new.path,
                    (SELECT doc FROM content WHERE hash = new.hash)
                );
            END;",
        )?;
        Ok(())
    }

    /// SHA-256 of a document body, lowercase hex.
    pub fn hash_content(body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(body.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Extract the document title from its markdown body.
    ///
    /// Takes the first `#` or `##` heading. A first heading of literally
    /// `Notes` or `📝 Notes` is a container, not a title; the next `##`
    /// heading wins instead. `None` when no usable heading exists (the
    /// caller falls back to the file stem).
    pub fn extract_title(body: &str) -> Option<String> {
        let mut first_seen = false;
        let mut want_next_h2 = false;

        for line in body.lines() {
            let trimmed = line.trim_end();
            let heading = trimmed
                .strip_prefix("## ")
                .or_else(|| trimmed.strip_prefix("# "));
            let Some(text) = heading else { continue };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            if want_next_h2 {
                if trimmed.starts_with("## ") {
                    return Some(text.to_string());
                }
                continue;
            }

            if !first_seen {
                first_seen = true;
                if text == "Notes" || text == "📝 Notes" {
                    want_next_h2 = true;
                    continue;
                }
                return Some(text.to_string());
            }
        }
        None
    }

    /// Normalize a relative path for storage: forward slashes, no
    /// leading `./`.
    pub fn handelize(path: &str) -> String {
        let normalized = path.replace('\\', "/");
        normalized
            .strip_prefix("./")
            .unwrap_or(&normalized)
            .trim_start_matches('/')
            .to_string()
    }

    /// Reclaim free pages.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Index-wide status summary.
    pub fn get_status(&self) -> Result<StatusResult> {
        let total_documents: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE active = 1",
            [],
            |r| r.get(0),
        )?;

        let needs_embedding: usize = self.conn.query_row(
            "SELECT COUNT(DISTINCT c.hash)
             FROM content c
             JOIN documents d ON d.hash = c.hash AND d.active = 1
             LEFT JOIN content_vectors cv ON cv.hash = c.hash AND cv.seq = 0
             WHERE cv.hash IS NULL AND length(c.doc) > 0",
            [],
            |r| r.get(0),
        )?;

        Ok(StatusResult {
            total_documents,
            needs_embedding,
            has_vector_index: self.has_vector_table()?,
            collections: self.list_collections()?,
        })
    }
}

/// Index-wide status, as shown by `qmd status` and the MCP status tool.
#[derive(Debug, Clone)]
pub struct StatusResult {
    pub total_documents: usize,
    pub needs_embedding: usize,
    pub has_vector_index: bool,
    pub collections: Vec<CollectionInfo>,
}

/// True when `path` uses the `qmd://` scheme.
pub fn is_virtual_path(path: &str) -> bool {
    path.starts_with("qmd://")
}

/// Split `qmd://{collection}/{path}` into its parts.
///
/// The collection is the first slash-delimited segment; the rest (possibly
/// empty) is the document path.
pub fn parse_virtual_path(path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix("qmd://")?;
    if rest.is_empty() {
        return None;
    }
    match rest.split_once('/') {
        Some((collection, file)) => Some((collection.to_string(), file.to_string())),
        None => Some((rest.to_string(), String::new())),
    }
}

/// Build the `qmd://` virtual path for a document.
pub fn build_virtual_path(collection: &str, path: &str) -> String {
    format!("qmd://{collection}/{path}")
}

/// Short content address, `#` plus the first six hash characters.
pub fn docid_from_hash(hash: &str) -> String {
    format!("#{}", &hash[..hash.len().min(6)])
}

/// True for strings shaped like a docid (`#` + at least 6 hex chars).
pub fn is_docid(s: &str) -> bool {
    s.strip_prefix('#').is_some_and(|rest| {
        rest.len() >= 6 && rest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    })
}

/// True when any path component is hidden or on the excluded list.
pub fn should_exclude(path: &Path) -> bool {
    path.components().any(|comp| {
        let name = comp.as_os_str().to_string_lossy();
        (name.starts_with('.') && name != "." && name != "..")
            || config::EXCLUDED_DIRS.contains(&name.as_ref())
    })
}

#[cfg(test)]
pub(crate) fn test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("test.sqlite")).expect("open store");
    (store, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_sha256() {
        let h = Store::hash_content("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn title_from_first_heading() {
        assert_eq!(
            Store::extract_title("# Hello World\nbody"),
            Some("Hello World".to_string())
        );
        assert_eq!(
            Store::extract_title("intro\n## Section One\ntext"),
            Some("Section One".to_string())
        );
        assert_eq!(Store::extract_title("no headings here"), None);
    }

    #[test]
    fn notes_heading_skipped() {
        let body = "# 📝 Notes\n\nsome text\n\n## Meeting Minutes\n\nmore";
        assert_eq!(
            Store::extract_title(body),
            Some("Meeting Minutes".to_string())
        );
        let body = "## Notes\n\n## Real Title\n";
        assert_eq!(Store::extract_title(body), Some("Real Title".to_string()));
        // "Notes" with no follow-up heading yields nothing.
        assert_eq!(Store::extract_title("# Notes\njust text"), None);
    }

    #[test]
    fn virtual_path_round_trip() {
        let built = build_virtual_path("wiki", "docs/intro.md");
        assert_eq!(built, "qmd://wiki/docs/intro.md");
        assert_eq!(
            parse_virtual_path(&built),
            Some(("wiki".to_string(), "docs/intro.md".to_string()))
        );
        assert_eq!(
            parse_virtual_path("qmd://wiki/"),
            Some(("wiki".to_string(), String::new()))
        );
        assert_eq!(parse_virtual_path("qmd://"), None);
        assert!(!is_virtual_path("/local/file.md"));
    }

    #[test]
    fn docid_shapes() {
        assert!(is_docid("#abc123"));
        assert!(is_docid("#deadbeef00"));
        assert!(!is_docid("abc123"));
        assert!(!is_docid("#ab"));
        assert!(!is_docid("#ABCDEF"));
        assert!(!is_docid("#ghijkl"));
        assert_eq!(docid_from_hash("abcdef0123456789"), "#abcdef");
    }

    #[test]
    fn excluded_paths() {
        assert!(should_exclude(Path::new("node_modules/pkg/readme.md")));
        assert!(should_exclude(Path::new("docs/.obsidian/file.md")));
        assert!(should_exclude(Path::new("a/vendor/b.md")));
        assert!(!should_exclude(Path::new("docs/guide.md")));
    }

    #[test]
    fn handelize_normalizes() {
        assert_eq!(Store::handelize("./a/b.md"), "a/b.md");
        assert_eq!(Store::handelize("a\\b\\c.md"), "a/b/c.md");
        assert_eq!(Store::handelize("/lead.md"), "lead.md");
    }

    #[test]
    fn schema_opens_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        drop(Store::open(&path).unwrap());
        // Second open must not trip on existing tables or triggers.
        let store = Store::open(&path).unwrap();
        let status = store.get_status().unwrap();
        assert_eq!(status.total_documents, 0);
    }
}
