//! Command-line definitions.

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::MULTI_GET_MAX_BYTES;

/// QMD - Query Markdown Documents.
#[derive(Parser, Debug)]
#[command(name = "qmd")]
#[command(author, version, about = "Full-text and semantic search for markdown collections")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for search and document listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    /// File paths only.
    Files,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage collections of markdown files.
    #[command(subcommand)]
    Collection(CollectionCommands),

    /// Manage folder context annotations.
    #[command(subcommand)]
    Context(ContextCommands),

    /// List collections or files within one.
    Ls {
        /// Collection name or qmd://collection/prefix path.
        path: Option<String>,
    },

    /// Print a document by path or docid.
    Get {
        /// qmd://collection/path, collection/path, or #docid.
        file: String,
        /// Start from this line (1-indexed).
        #[arg(long)]
        from_line: Option<usize>,
        /// Maximum number of lines to print.
        #[arg(long)]
        max_lines: Option<usize>,
        /// Prefix lines with their numbers.
        #[arg(short = 'l', long)]
        line_numbers: bool,
    },

    /// Print multiple documents by comma list or glob.
    MultiGet {
        /// Comma-separated paths or a glob like qmd://docs/**/*.md.
        pattern: String,
        /// Maximum lines per file.
        #[arg(long)]
        max_lines: Option<usize>,
        /// Per-file size cap in bytes; larger files are skipped.
        #[arg(long, default_value_t = MULTI_GET_MAX_BYTES)]
        max_bytes: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show index status.
    Status,

    /// Reindex every collection (clears the LLM cache first).
    Update,

    /// Full-text search (BM25).
    Search {
        query: String,
        /// Restrict to one collection.
        #[arg(short, long)]
        collection: Option<String>,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        /// Drop hits below this score.
        #[arg(long)]
        min_score: Option<f64>,
        /// Include full document bodies.
        #[arg(long)]
        full: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Semantic vector search.
    Vsearch {
        query: String,
        #[arg(short, long)]
        collection: Option<String>,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        min_score: Option<f64>,
        #[arg(long)]
        full: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Embedding model override.
        #[arg(long)]
        model: Option<String>,
    },

    /// Hybrid search: expansion, FTS + vectors, RRF fusion, reranking.
    Query {
        query: String,
        #[arg(short, long)]
        collection: Option<String>,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        min_score: Option<f64>,
        #[arg(long)]
        full: bool,
        /// Skip LLM query expansion.
        #[arg(long)]
        no_expand: bool,
        /// Skip LLM reranking.
        #[arg(long)]
        no_rerank: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show the LLM's expansions for a query.
    Expand { query: String },

    /// Generate embeddings for documents that need them.
    Embed {
        /// Re-embed everything from scratch.
        #[arg(short, long)]
        force: bool,
        /// Embedding model override.
        #[arg(long)]
        model: Option<String>,
    },

    /// Model availability and downloads.
    #[command(subcommand)]
    Models(ModelCommands),

    /// Database maintenance.
    #[command(subcommand)]
    Db(DbCommands),

    /// Full cleanup: cache, inactive documents, orphans, vacuum.
    Cleanup,
}

#[derive(Subcommand, Debug)]
pub enum CollectionCommands {
    /// Index a directory as a new collection.
    Add {
        /// Directory to index.
        path: String,
        /// Collection name (defaults to the directory basename).
        #[arg(short, long)]
        name: Option<String>,
        /// Glob pattern for files to include.
        #[arg(short, long, default_value = "**/*.md")]
        mask: String,
    },
    /// List collections.
    List,
    /// Remove a collection and its documents.
    Remove { name: String },
    /// Rename a collection.
    Rename { old_name: String, new_name: String },
}

#[derive(Subcommand, Debug)]
pub enum ContextCommands {
    /// Attach context to a collection path.
    Add {
        /// qmd://collection/prefix or a local path inside a collection.
        path: Option<String>,
        /// The context text.
        text: String,
    },
    /// List configured contexts.
    List,
    /// Report collections without any context.
    Check,
    /// Remove a context.
    Rm { path: String },
}

#[derive(Subcommand, Debug)]
pub enum ModelCommands {
    /// List models available on the provider.
    List,
    /// Ask the provider to download a model.
    Pull {
        /// Model name, or "all" for the configured defaults.
        model: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Remove inactive documents and orphaned rows.
    Cleanup,
    /// VACUUM the database file.
    Vacuum,
    /// Clear the LLM response cache.
    ClearCache,
}
