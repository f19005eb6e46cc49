//! Error types for the QMD library.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, QmdError>;

/// Errors surfaced by the QMD core.
///
/// Repositories propagate database errors untouched; services translate
/// them into this taxonomy at the boundary. Binaries convert to exits.
#[derive(Debug, Error)]
pub enum QmdError {
    /// A collection, document, or model does not exist. For documents the
    /// error carries up to five similar paths to suggest.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What was looked up ("collection", "document", "model").
        kind: &'static str,
        /// The name or path that missed.
        name: String,
        /// Close matches to suggest, possibly empty.
        similar: Vec<String>,
    },

    /// Input rejected before any store mutation (duplicate names,
    /// malformed virtual paths, bad globs).
    #[error("validation error: {0}")]
    Validation(String),

    /// The LLM provider failed transiently (network, non-success status,
    /// malformed body). Callers retry once after a model pull or record
    /// the error and continue.
    #[error("llm provider error: {0}")]
    Llm(String),

    /// The store is in a state that makes the operation meaningless
    /// (vector table absent, dimension mismatch, empty FTS query).
    /// Search paths degrade instead of failing.
    #[error("state error: {0}")]
    State(String),

    /// Database open, statement, or migration failure. Fatal at the
    /// process level; any open transaction rolls back.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),
}

impl QmdError {
    /// NotFound with no suggestions.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
            similar: Vec::new(),
        }
    }
}
