//! MCP Server implementation for QMD.
//!
//! Uses `spawn_blocking` to run synchronous rusqlite and HTTP provider
//! operations in a dedicated thread pool; stdout stays reserved for the
//! protocol.

use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use rmcp::{
    ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, Implementation, InitializeResult, ListResourceTemplatesResult,
        AnnotateAble, ListResourcesResult, PaginatedRequestParam, ProtocolVersion, RawResource,
        RawResourceTemplate, ReadResourceRequestParam, ReadResourceResult, ResourceContents,
        ServerCapabilities,
    },
    schemars,
    schemars::JsonSchema,
    tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};

use qmd::store::{is_docid, is_virtual_path, parse_virtual_path};
use qmd::{HybridOptions, Ollama, SearchEngine, SearchOptions, Store};

/// Type alias for ServerInfo (same as InitializeResult).
type ServerInfo = InitializeResult;

/// QMD MCP Server exposing search and document retrieval tools.
#[derive(Clone, Default, Debug)]
pub struct QmdMcpServer {
    /// Tool router for handling tool calls.
    tool_router: ToolRouter<Self>,
}

impl QmdMcpServer {
    /// Create a new QMD MCP server instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }
}

/// Parameters for the search tools.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Search query - keywords or phrases to find.
    pub query: String,
    /// Maximum number of results (default: 10).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Minimum relevance score (default: 0).
    #[serde(default)]
    pub min_score: f64,
    /// Filter to a specific collection by name.
    pub collection: Option<String>,
}

/// Parameters for the get tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetParams {
    /// File path or docid from search results
    /// (e.g. 'qmd://notes/meeting.md', 'notes/meeting.md', '#abc123').
    pub file: String,
    /// Start from this line number (1-indexed).
    pub from_line: Option<usize>,
    /// Maximum number of lines to return.
    pub max_lines: Option<usize>,
    /// Add line numbers to output (default: true).
    #[serde(default = "default_true")]
    pub line_numbers: bool,
}

/// Parameters for the multi_get tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MultiGetParams {
    /// Comma-separated document paths or a glob like 'docs/**/*.md'.
    pub pattern: String,
    /// Maximum lines per file.
    pub max_lines: Option<usize>,
    /// Per-file size cap in bytes; larger files are reported as skipped.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

fn default_limit() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_max_bytes() -> usize {
    qmd::config::MULTI_GET_MAX_BYTES
}

/// Search result item for structured output.
#[derive(Debug, Serialize)]
struct SearchResultItem {
    docid: String,
    file: String,
    title: String,
    score: f64,
    context: Option<String>,
    snippet: Option<String>,
}

/// Status result for structured output.
#[derive(Debug, Serialize)]
struct StatusResult {
    total_documents: usize,
    needs_embedding: usize,
    has_vector_index: bool,
    collections: Vec<CollectionStatus>,
}

/// Collection status for structured output.
#[derive(Debug, Serialize)]
struct CollectionStatus {
    name: String,
    path: String,
    documents: usize,
}

/// Convert qmd error to MCP error.
fn to_mcp_error(e: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(e.to_string(), None)
}

/// Add line numbers to text.
fn add_line_numbers(text: &str, start: usize) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", start + i, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolve a tool-provided reference to `(collection, path)`.
fn resolve_reference(store: &Store, input: &str) -> Result<(String, String), String> {
    if is_docid(input) {
        return store
            .find_document_by_docid(input)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Document not found: {input}"));
    }
    if is_virtual_path(input) {
        return parse_virtual_path(input).ok_or_else(|| format!("Invalid virtual path: {input}"));
    }
    let parts: Vec<&str> = input.splitn(2, '/').collect();
    if parts.len() == 2 {
        return Ok((parts[0].to_string(), parts[1].to_string()));
    }
    Err(format!("Could not resolve path: {input}"))
}

/// Summary + similar-path suffix for a missing document.
fn not_found_message(store: &Store, reference: &str) -> String {
    let mut message = format!("Document not found: {reference}");
    if let Ok(similar) = qmd::find_similar_files(store, reference)
        && !similar.is_empty()
    {
        message.push_str("\n\nSimilar files:\n");
        for path in similar {
            message.push_str(&format!("  {path}\n"));
        }
    }
    message
}

/// Render hits into the shared item shape, with snippets from bodies.
fn to_items(store: &Store, results: &[qmd::SearchResult], query: &str) -> Vec<SearchResultItem> {
    let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    results
        .iter()
        .map(|r| {
            let snippet = store
                .get_document(&r.doc.collection_name, &r.doc.path)
                .ok()
                .flatten()
                .and_then(|d| d.body)
                .map(|body| qmd::extract_snippet(&body, &terms, r.chunk_pos));
            SearchResultItem {
                docid: format!("#{}", r.doc.docid.trim_start_matches('#')),
                file: r.doc.display_path.clone(),
                title: r.doc.title.clone(),
                score: (r.score * 100.0).round() / 100.0,
                context: r.doc.context.clone(),
                snippet,
            }
        })
        .collect()
}

/// Summary text plus pretty JSON payload in one tool result.
fn summarized(summary: String, payload: impl Serialize) -> CallToolResult {
    let json = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "[]".to_string());
    CallToolResult::success(vec![Content::text(summary), Content::text(json)])
}

fn summarize_items(items: &[SearchResultItem]) -> String {
    if items.is_empty() {
        return "No results found".to_string();
    }
    items
        .iter()
        .map(|r| {
            format!(
                "{} {}% {} - {}",
                r.docid,
                (r.score * 100.0) as i32,
                r.file,
                r.title
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[tool_router]
impl QmdMcpServer {
    /// Fast keyword-based full-text search using BM25.
    /// Best for finding documents with specific words or phrases.
    #[tool(name = "search")]
    async fn search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;

        let items = tokio::task::spawn_blocking(
            move || -> Result<Vec<SearchResultItem>, qmd::QmdError> {
                let store = Store::new()?;
                let llm = Ollama::from_env();
                let engine = SearchEngine::new(&store, &llm);
                let results = engine.search_fts(
                    &p.query,
                    &SearchOptions {
                        collection: p.collection,
                        limit: p.limit,
                        min_score: Some(p.min_score),
                    },
                )?;
                Ok(to_items(&store, &results, &p.query))
            },
        )
        .await
        .map_err(to_mcp_error)?
        .map_err(to_mcp_error)?;

        Ok(summarized(summarize_items(&items), items))
    }

    /// Semantic vector search over document embeddings.
    /// Best for conceptual queries where exact keywords are unknown.
    #[tool(name = "vsearch")]
    async fn vsearch(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;

        let items = tokio::task::spawn_blocking(
            move || -> Result<Vec<SearchResultItem>, qmd::QmdError> {
                let store = Store::new()?;
                let llm = Ollama::from_env();
                let engine = SearchEngine::new(&store, &llm);
                let results = engine.search_vector(
                    &p.query,
                    &SearchOptions {
                        collection: p.collection,
                        limit: p.limit,
                        min_score: Some(p.min_score),
                    },
                )?;
                Ok(to_items(&store, &results, &p.query))
            },
        )
        .await
        .map_err(to_mcp_error)?
        .map_err(to_mcp_error)?;

        let summary = if items.is_empty() {
            "No results found. Run 'qmd embed' to generate embeddings first.".to_string()
        } else {
            summarize_items(&items)
        };
        Ok(summarized(summary, items))
    }

    /// Hybrid search: query expansion, BM25 + vectors, rank fusion, and
    /// LLM reranking. The highest-quality search, and the slowest.
    #[tool(name = "query")]
    async fn query(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;

        let items = tokio::task::spawn_blocking(
            move || -> Result<Vec<SearchResultItem>, qmd::QmdError> {
                let store = Store::new()?;
                let llm = Ollama::from_env();
                let engine = SearchEngine::new(&store, &llm);
                let results = engine.search_hybrid(
                    &p.query,
                    &HybridOptions {
                        collection: p.collection,
                        limit: p.limit,
                        min_score: Some(p.min_score),
                        expand: true,
                        rerank: true,
                    },
                )?;
                Ok(to_items(&store, &results, &p.query))
            },
        )
        .await
        .map_err(to_mcp_error)?
        .map_err(to_mcp_error)?;

        Ok(summarized(summarize_items(&items), items))
    }

    /// Retrieve the full content of a document by its file path or docid
    /// (#abc123).
    #[tool(name = "get")]
    async fn get(&self, params: Parameters<GetParams>) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;

        let result = tokio::task::spawn_blocking(
            move || -> Result<std::result::Result<(String, String, Option<String>), String>, qmd::QmdError> {
                let store = Store::new()?;

                let (collection, path) = match resolve_reference(&store, &p.file) {
                    Ok(parts) => parts,
                    Err(_) => return Ok(Err(not_found_message(&store, &p.file))),
                };

                let Some(doc) = store.get_document(&collection, &path)? else {
                    return Ok(Err(not_found_message(&store, &p.file)));
                };

                let mut body = doc.body.unwrap_or_default();
                if let Some(from) = p.from_line {
                    let lines: Vec<&str> = body.lines().collect();
                    let start = from.saturating_sub(1);
                    let end = p.max_lines.map_or(lines.len(), |m| start + m);
                    body = lines
                        .get(start..end.min(lines.len()))
                        .map(|s| s.join("\n"))
                        .unwrap_or_default();
                } else if let Some(max) = p.max_lines {
                    let lines: Vec<&str> = body.lines().take(max).collect();
                    body = lines.join("\n");
                }

                if p.line_numbers {
                    body = add_line_numbers(&body, p.from_line.unwrap_or(1));
                }

                Ok(Ok((doc.title, body, doc.context)))
            },
        )
        .await
        .map_err(to_mcp_error)?
        .map_err(to_mcp_error)?;

        match result {
            Ok((title, body, context)) => {
                let mut text = format!("# {title}\n\n");
                if let Some(ctx) = context {
                    text.push_str(&format!("<!-- Context: {ctx} -->\n\n"));
                }
                text.push_str(&body);
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(message) => Ok(CallToolResult::success(vec![Content::text(message)])),
        }
    }

    /// Retrieve multiple documents by comma-separated paths or a glob
    /// pattern. Oversized files are listed but skipped.
    #[tool(name = "multi_get")]
    async fn multi_get(
        &self,
        params: Parameters<MultiGetParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;

        let sections = tokio::task::spawn_blocking(move || -> Result<Vec<String>, qmd::QmdError> {
            let store = Store::new()?;
            let is_comma_list =
                p.pattern.contains(',') && !p.pattern.contains('*') && !p.pattern.contains('?');

            let docs = if is_comma_list {
                let mut docs = Vec::new();
                for name in p.pattern.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    match resolve_reference(&store, name) {
                        Ok((collection, path)) => {
                            if let Some(doc) = store.get_document(&collection, &path)? {
                                docs.push(doc);
                            } else {
                                docs.push(missing_doc(name));
                            }
                        }
                        Err(_) => docs.push(missing_doc(name)),
                    }
                }
                docs
            } else {
                qmd::match_files_by_glob(&store, &p.pattern)?
            };

            let mut sections = Vec::new();
            for doc in docs {
                if doc.hash.is_empty() {
                    sections.push(format!("==> {} <==\n(not found)", doc.filepath));
                    continue;
                }
                if doc.body_length > p.max_bytes {
                    sections.push(format!(
                        "==> {} <==\nSkipped: file too large ({}KB > {}KB)",
                        doc.filepath,
                        doc.body_length / 1024,
                        p.max_bytes / 1024
                    ));
                    continue;
                }
                let full = match doc.body {
                    Some(_) => doc,
                    None => store
                        .get_document(&doc.collection_name, &doc.path)?
                        .unwrap_or(doc),
                };
                let mut body = full.body.unwrap_or_default();
                if let Some(limit) = p.max_lines {
                    body = body.lines().take(limit).collect::<Vec<_>>().join("\n");
                }
                let mut section = format!("==> {} <==\n", full.filepath);
                if let Some(ctx) = full.context {
                    section.push_str(&format!("<!-- Context: {ctx} -->\n"));
                }
                section.push_str(&body);
                sections.push(section);
            }
            Ok(sections)
        })
        .await
        .map_err(to_mcp_error)?
        .map_err(to_mcp_error)?;

        if sections.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                "No files matched pattern",
            )]));
        }
        Ok(CallToolResult::success(vec![Content::text(
            sections.join("\n\n"),
        )]))
    }

    /// Show the status of the QMD index: collections, document counts,
    /// and embedding health.
    #[tool(name = "status")]
    async fn status(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let result = tokio::task::spawn_blocking(|| -> Result<StatusResult, qmd::QmdError> {
            let store = Store::new()?;
            let status = store.get_status()?;

            Ok(StatusResult {
                total_documents: status.total_documents,
                needs_embedding: status.needs_embedding,
                has_vector_index: status.has_vector_index,
                collections: status
                    .collections
                    .into_iter()
                    .map(|c| CollectionStatus {
                        name: c.name,
                        path: c.pwd,
                        documents: c.active_count,
                    })
                    .collect(),
            })
        })
        .await
        .map_err(to_mcp_error)?
        .map_err(to_mcp_error)?;

        let mut lines = vec![
            "QMD Index Status:".to_string(),
            format!("  Total documents: {}", result.total_documents),
            format!("  Needs embedding: {}", result.needs_embedding),
            format!(
                "  Vector index: {}",
                if result.has_vector_index { "yes" } else { "no" }
            ),
            format!("  Collections: {}", result.collections.len()),
        ];
        for col in &result.collections {
            lines.push(format!("    - {} ({} docs)", col.name, col.documents));
        }

        Ok(summarized(lines.join("\n"), result))
    }
}

/// Placeholder for a reference that did not resolve.
fn missing_doc(reference: &str) -> qmd::DocumentResult {
    qmd::DocumentResult {
        filepath: reference.to_string(),
        display_path: reference.to_string(),
        title: String::new(),
        context: None,
        hash: String::new(),
        docid: String::new(),
        collection_name: String::new(),
        path: String::new(),
        modified_at: String::new(),
        body_length: 0,
        body: None,
    }
}

/// Percent-encode each path segment, preserving the slashes between them.
pub fn encode_qmd_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode a percent-encoded qmd path, segment by segment.
pub fn decode_qmd_path(path: &str) -> String {
    path.split('/')
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parse a `qmd://` resource URI into `(collection, path)`.
pub fn parse_qmd_uri(uri: &str) -> Result<(String, String), rmcp::ErrorData> {
    let stripped = uri.strip_prefix("qmd://").ok_or_else(|| {
        rmcp::ErrorData::resource_not_found(format!("unsupported uri: {uri}"), None)
    })?;

    let decoded = decode_qmd_path(stripped);
    let mut parts = decoded.splitn(2, '/');
    let collection = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    if collection.is_empty() || path.is_empty() {
        return Err(rmcp::ErrorData::resource_not_found(
            format!("invalid qmd uri: {uri}"),
            None,
        ));
    }
    Ok((collection.to_string(), path.to_string()))
}

fn read_resource_contents(uri: &str) -> Result<ResourceContents, rmcp::ErrorData> {
    let (collection, path) = parse_qmd_uri(uri)?;
    let store = Store::new().map_err(to_mcp_error)?;

    let Some(doc) = store
        .get_document(&collection, &path)
        .map_err(to_mcp_error)?
    else {
        return Err(rmcp::ErrorData::resource_not_found(
            not_found_message(&store, &format!("qmd://{collection}/{path}")),
            None,
        ));
    };

    let mut text = doc.body.unwrap_or_default();
    if let Some(context) = doc.context {
        text = format!("<!-- Context: {context} -->\n\n{text}");
    }

    Ok(ResourceContents::TextResourceContents {
        uri: uri.to_string(),
        mime_type: Some("text/markdown".to_string()),
        text,
        meta: None,
    })
}

#[tool_handler]
impl ServerHandler for QmdMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "qmd".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "QMD - Quick Markdown Search. A local search engine for markdown knowledge \
                 bases. Use 'search' for keyword lookups, 'vsearch' for semantic lookups, \
                 'query' for the best-quality hybrid results, 'get'/'multi_get' to retrieve \
                 documents, and 'status' to check the index."
                    .into(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<ListResourcesResult, rmcp::ErrorData> {
        let resources = tokio::task::spawn_blocking(|| -> Result<Vec<_>, qmd::QmdError> {
            let store = Store::new()?;
            let mut resources = Vec::new();
            for coll in store.list_collections()? {
                for (path, title, _, _) in store.list_files(&coll.name, None)? {
                    let uri = format!("qmd://{}/{}", coll.name, encode_qmd_path(&path));
                    let mut resource = RawResource::new(uri, title);
                    resource.mime_type = Some("text/markdown".to_string());
                    resources.push(resource.no_annotation());
                }
            }
            Ok(resources)
        })
        .await
        .map_err(to_mcp_error)?
        .map_err(to_mcp_error)?;

        Ok(ListResourcesResult {
            next_cursor: None,
            resources,
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<ListResourceTemplatesResult, rmcp::ErrorData> {
        let template = RawResourceTemplate {
            uri_template: "qmd://{+path}".to_string(),
            name: "qmd-document".to_string(),
            title: Some("QMD document".to_string()),
            description: Some(
                "A markdown document from the QMD index, addressed as \
                 qmd://collection/path. Use the search tools to discover documents."
                    .to_string(),
            ),
            mime_type: Some("text/markdown".to_string()),
        }
        .no_annotation();

        Ok(ListResourceTemplatesResult {
            next_cursor: None,
            resource_templates: vec![template],
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<ReadResourceResult, rmcp::ErrorData> {
        let contents = tokio::task::spawn_blocking(move || read_resource_contents(&request.uri))
            .await
            .map_err(to_mcp_error)??;
        Ok(ReadResourceResult {
            contents: vec![contents],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qmd_path_encoding_round_trips() {
        let path = "docs/meeting notes/2026-01.md";
        let encoded = encode_qmd_path(path);
        assert!(encoded.contains("meeting%20notes"));
        // Slashes between segments survive.
        assert_eq!(encoded.matches('/').count(), 2);
        assert_eq!(decode_qmd_path(&encoded), path);
    }

    #[test]
    fn ascii_paths_decode_to_identity() {
        let path = "docs/readme.md";
        assert_eq!(decode_qmd_path(&encode_qmd_path(path)), path);
    }

    #[test]
    fn uri_parsing() {
        let (coll, path) = parse_qmd_uri("qmd://wiki/docs/intro.md").unwrap();
        assert_eq!(coll, "wiki");
        assert_eq!(path, "docs/intro.md");

        assert!(parse_qmd_uri("bert://wiki/doc.md").is_err());
        assert!(parse_qmd_uri("qmd://wiki").is_err());
        assert!(parse_qmd_uri("qmd:///doc.md").is_err());
    }

    #[test]
    fn encoded_segments_decode_in_uri() {
        let uri = format!("qmd://wiki/{}", encode_qmd_path("a b/c d.md"));
        let (coll, path) = parse_qmd_uri(&uri).unwrap();
        assert_eq!(coll, "wiki");
        assert_eq!(path, "a b/c d.md");
    }
}
