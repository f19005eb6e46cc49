//! QMD MCP Server - Model Context Protocol server for QMD search engine.
//!
//! This crate provides an MCP server that exposes QMD's search and document
//! retrieval capabilities to AI assistants via the Model Context Protocol.
//!
//! ## Tools
//!
//! - `search` - BM25 full-text search
//! - `vsearch` - semantic vector search
//! - `query` - hybrid search with expansion and reranking
//! - `get` / `multi_get` - document retrieval
//! - `status` - index health
//!
//! Documents are also exposed as `qmd://{collection}/{path}` resources
//! with `text/markdown` content.
//!
//! ## Usage
//!
//! ```bash
//! # Start with stdio transport
//! qmd-mcp
//! ```

pub mod server;

pub use server::QmdMcpServer;
