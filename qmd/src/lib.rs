//! QMD - Query Markdown Documents
//!
//! A local search engine for markdown collections: content-addressed
//! storage, BM25 full-text search, semantic vector search, and hybrid
//! retrieval with query expansion and LLM reranking.
//!
//! ## Features
//!
//! - Full-text search with BM25 ranking
//! - Vector semantic search through an Ollama-compatible provider
//! - Query expansion and RRF fusion with blended reranking
//! - Content-addressable storage with SHA-256 deduplication
//! - Path-prefix context annotations and `qmd://` virtual paths

pub mod cli;
pub mod config;
pub mod embedder;
pub mod error;
pub mod formatter;
pub mod indexer;
pub mod llm;
pub mod search;
pub mod store;

pub use cli::{Cli, Commands, OutputFormat};
pub use embedder::{EmbedProgress, EmbedResult, embed_documents};
pub use error::{QmdError, Result};
pub use indexer::{IndexResult, index_files};
pub use llm::{
    BatchRerankResult, Chunk, Cursor, EmbeddingResult, GenerateOptions, GenerationResult,
    LlmProvider, ModelInfo, Ollama, Progress, RerankDocument, RerankResult, RrfResult,
    chunk_document, extract_snippet, format_doc_for_embedding, format_eta,
    format_query_for_embedding, reciprocal_rank_fusion, render_progress_bar, rerank_documents,
};
pub use search::{HybridOptions, SearchEngine, SearchOptions};
pub use store::{
    CollectionInfo, DocumentResult, SearchResult, SearchSource, Store, build_virtual_path,
    find_similar_files, is_docid, is_virtual_path, match_files_by_glob, parse_virtual_path,
    should_exclude,
};
