//! Indexing: reconcile a directory tree against the store.
//!
//! A run walks the collection's glob matches, content-addresses every
//! file, and applies the minimal document changes: insert new paths,
//! rehash changed ones, fix drifted titles, and soft-delete paths that
//! disappeared. The FTS mirror follows through triggers; orphaned content
//! is swept at the end.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::error::Result;
use crate::store::{Store, should_exclude};

/// Counters from one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexResult {
    pub collection: String,
    pub indexed: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub orphaned_content: usize,
}

/// Per-file progress callback: `(current, total, relative_path)`.
pub type IndexProgress<'a> = &'a mut dyn FnMut(usize, usize, &str);

/// Title for a file: first usable heading, else the file stem.
fn title_for(path: &str, body: &str) -> String {
    Store::extract_title(body).unwrap_or_else(|| {
        Path::new(path)
            .file_stem()
            .map_or_else(|| path.to_string(), |s| s.to_string_lossy().to_string())
    })
}

/// Filesystem mtime as RFC3339, falling back to `now`.
fn mtime_or(path: &Path, now: &str) -> String {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_else(|_| now.to_string())
}

/// Index all files matching `glob_pattern` under `pwd`.
///
/// Gets or creates the collection keyed by `(pwd, glob_pattern)`. Files
/// are processed in walk order; hidden and excluded directories are
/// skipped.
pub fn index_files(
    store: &Store,
    pwd: &str,
    glob_pattern: &str,
    mut progress: Option<IndexProgress>,
) -> Result<IndexResult> {
    let pwd = std::fs::canonicalize(pwd)?
        .to_string_lossy()
        .to_string();
    let now = Utc::now().to_rfc3339();
    let collection = store.get_or_create_collection(&pwd, glob_pattern, &now)?;
    let matcher = glob::Pattern::new(glob_pattern)?;

    // Collect matching files relative to the collection root.
    let mut files: Vec<(std::path::PathBuf, String)> = Vec::new();
    for entry in WalkDir::new(&pwd)
        .follow_links(true)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let rel_path = path.strip_prefix(&pwd).unwrap_or(path);
        if should_exclude(rel_path) {
            continue;
        }
        let rel_str = rel_path.to_string_lossy();
        if matcher.matches(&rel_str) {
            files.push((path.to_path_buf(), rel_str.to_string()));
        }
    }

    let total = files.len();
    let mut result = IndexResult {
        collection: collection.name.clone(),
        ..Default::default()
    };
    let mut seen_paths: HashSet<String> = HashSet::new();

    for (i, (abs_path, rel_path)) in files.iter().enumerate() {
        if let Some(cb) = progress.as_mut() {
            cb(i + 1, total, rel_path);
        }

        let normalized = Store::handelize(rel_path);

        let body = match std::fs::read_to_string(abs_path) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("warning: could not read {rel_path}: {e}");
                continue;
            }
        };
        seen_paths.insert(normalized.clone());

        let hash = Store::hash_content(&body);
        let title = title_for(&normalized, &body);
        // Idempotent, and restores content swept while a document was
        // soft-deleted.
        store.insert_content(&hash, &body, &now)?;

        match store.find_document(collection.id, &normalized)? {
            None => {
                let modified = mtime_or(abs_path, &now);
                store.insert_document(collection.id, &normalized, &title, &hash, &now, &modified)?;
                result.indexed += 1;
            }
            Some((doc_id, existing_hash, existing_title, active)) => {
                if existing_hash == hash {
                    if !active {
                        // The file came back after a soft delete.
                        store.reactivate_document(collection.id, &normalized)?;
                        result.indexed += 1;
                    } else if existing_title != title {
                        store.update_document_title(doc_id, &title, &now)?;
                        result.updated += 1;
                    } else {
                        result.unchanged += 1;
                    }
                } else {
                    store.update_document(doc_id, &title, &hash, &now)?;
                    result.updated += 1;
                }
            }
        }
    }

    // Soft-delete documents whose file disappeared.
    for (doc_id, path) in store.get_active_document_paths(collection.id)? {
        if !seen_paths.contains(&path) {
            store.deactivate_document(doc_id)?;
            result.removed += 1;
        }
    }

    result.orphaned_content = store.cleanup_orphaned_content()?;
    store.touch_collection(collection.id, &now)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }

    /// A collection root named "repo" inside a tempdir, so the derived
    /// collection name is stable.
    fn fixture() -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir(&root).unwrap();
        (tmp, root)
    }

    #[test]
    fn index_then_search() {
        let (store, _db) = test_store();
        let (_tmp, root) = fixture();
        write(&root, "notes.md", "# Title\nthe quick brown fox");

        let result = index_files(&store, root.to_str().unwrap(), "**/*.md", None).unwrap();
        assert_eq!(result.collection, "repo");
        assert_eq!(result.indexed, 1);
        assert_eq!(result.removed, 0);

        let hits = store.search_fts("quick", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.title, "Title");
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn reindex_is_idempotent() {
        let (store, _db) = test_store();
        let (_tmp, root) = fixture();
        write(&root, "a.md", "# A\nalpha");
        write(&root, "sub/b.md", "# B\nbeta");

        let pwd = root.to_str().unwrap().to_string();
        let first = index_files(&store, &pwd, "**/*.md", None).unwrap();
        assert_eq!(first.indexed, 2);

        let second = index_files(&store, &pwd, "**/*.md", None).unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.removed, 0);
    }

    #[test]
    fn changed_content_updates_document() {
        let (store, _db) = test_store();
        let (_tmp, root) = fixture();
        write(&root, "doc.md", "# Old\nold body");
        let pwd = root.to_str().unwrap().to_string();
        index_files(&store, &pwd, "**/*.md", None).unwrap();

        write(&root, "doc.md", "# New\nnew body");
        let result = index_files(&store, &pwd, "**/*.md", None).unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(result.indexed, 0);

        assert!(store.search_fts("old", 10, None).unwrap().is_empty());
        assert_eq!(store.search_fts("new", 10, None).unwrap().len(), 1);
        // The old body is orphaned and swept in the same run.
        assert_eq!(result.orphaned_content, 1);
    }

    #[test]
    fn removed_file_deactivates_and_sweeps() {
        let (store, _db) = test_store();
        let (_tmp, root) = fixture();
        write(&root, "x.md", "# X\nbody of x");
        let pwd = root.to_str().unwrap().to_string();
        index_files(&store, &pwd, "**/*.md", None).unwrap();

        std::fs::remove_file(root.join("x.md")).unwrap();
        let result = index_files(&store, &pwd, "**/*.md", None).unwrap();
        assert_eq!(result.removed, 1);
        assert_eq!(result.orphaned_content, 1);
        assert!(store.get_document("repo", "x.md").unwrap().is_none());
    }

    #[test]
    fn returning_file_reactivates() {
        let (store, _db) = test_store();
        let (_tmp, root) = fixture();
        write(&root, "x.md", "# X\ncomeback body");
        let pwd = root.to_str().unwrap().to_string();
        index_files(&store, &pwd, "**/*.md", None).unwrap();

        std::fs::remove_file(root.join("x.md")).unwrap();
        index_files(&store, &pwd, "**/*.md", None).unwrap();

        write(&root, "x.md", "# X\ncomeback body");
        let result = index_files(&store, &pwd, "**/*.md", None).unwrap();
        assert_eq!(result.indexed, 1);
        assert_eq!(store.search_fts("comeback", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn excluded_and_hidden_paths_are_skipped() {
        let (store, _db) = test_store();
        let (_tmp, root) = fixture();
        write(&root, "keep.md", "# Keep\nvisible");
        write(&root, "node_modules/pkg/readme.md", "# Skip\nignored");
        write(&root, ".obsidian/config.md", "# Skip\nignored");

        let result = index_files(&store, root.to_str().unwrap(), "**/*.md", None).unwrap();
        assert_eq!(result.indexed, 1);
    }

    #[test]
    fn title_changes_count_as_updates() {
        let (store, _db) = test_store();
        let (_tmp, root) = fixture();
        // No heading: title falls back to the stem.
        write(&root, "plain.md", "just text, no heading");
        let pwd = root.to_str().unwrap().to_string();
        index_files(&store, &pwd, "**/*.md", None).unwrap();

        let doc = store.get_document("repo", "plain.md").unwrap().unwrap();
        assert_eq!(doc.title, "plain");
    }

    #[test]
    fn progress_callback_sees_every_file() {
        let (store, _db) = test_store();
        let (_tmp, root) = fixture();
        write(&root, "a.md", "# A\n");
        write(&root, "b.md", "# B\n");

        let mut calls = Vec::new();
        let mut cb = |current: usize, total: usize, path: &str| {
            calls.push((current, total, path.to_string()));
        };
        index_files(&store, root.to_str().unwrap(), "**/*.md", Some(&mut cb)).unwrap();

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, 2);
        assert_eq!(calls[1].0, 2);
    }
}
