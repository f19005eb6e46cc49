//! Configuration: filesystem locations, environment overrides, and
//! default model names.
//!
//! Everything here is resolved once at call time; there is no config file.
//! `QMD_INDEX_PATH` points at a specific database file, `XDG_CACHE_HOME`
//! moves the default cache root, and `QMD_LLM_URL` selects the provider
//! endpoint.

use std::path::PathBuf;

/// Maximum chunk size in UTF-8 bytes for embedding.
pub const MAX_CHUNK_BYTES: usize = 6144;

/// Per-file byte cap for `multi-get`; larger files are reported as skipped.
pub const MULTI_GET_MAX_BYTES: usize = 50 * 1024;

/// Directory names never descended into while indexing.
pub const EXCLUDED_DIRS: &[&str] = &["node_modules", ".git", ".cache", "vendor", "dist", "build"];

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "embeddinggemma";

/// Default model for query expansion.
pub const DEFAULT_QUERY_MODEL: &str = "qwen3:1.7b";

/// Default model for reranking.
pub const DEFAULT_RERANK_MODEL: &str = "qwen3:1.7b";

/// Default LLM provider endpoint.
pub const DEFAULT_LLM_BASE_URL: &str = "http://localhost:11434";

/// Resolve the database file path.
///
/// `QMD_INDEX_PATH` wins outright (tests and custom indexes). Otherwise
/// the file lives under the OS cache directory, overridable via
/// `XDG_CACHE_HOME`.
pub fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("QMD_INDEX_PATH")
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    get_cache_dir().join("index.sqlite")
}

/// The qmd cache directory (`~/.cache/qmd` or platform equivalent).
pub fn get_cache_dir() -> PathBuf {
    if let Ok(root) = std::env::var("XDG_CACHE_HOME")
        && !root.is_empty()
    {
        return PathBuf::from(root).join("qmd");
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qmd")
}

/// Base URL of the LLM provider.
pub fn get_llm_base_url() -> String {
    std::env::var("QMD_LLM_URL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string())
}

fn model_from_env(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Embedding model name, `QMD_EMBED_MODEL` overridable.
pub fn get_embed_model() -> String {
    model_from_env("QMD_EMBED_MODEL", DEFAULT_EMBED_MODEL)
}

/// Query-expansion model name, `QMD_QUERY_MODEL` overridable.
pub fn get_query_model() -> String {
    model_from_env("QMD_QUERY_MODEL", DEFAULT_QUERY_MODEL)
}

/// Rerank model name, `QMD_RERANK_MODEL` overridable.
pub fn get_rerank_model() -> String {
    model_from_env("QMD_RERANK_MODEL", DEFAULT_RERANK_MODEL)
}
