//! LLM provider interface and the Ollama-compatible HTTP client.
//!
//! The core never talks to a model directly; everything goes through
//! [`LlmProvider`]. Network and provider failures are soft: `embed` and
//! `generate` return `None` and callers degrade or skip.

pub mod chunker;
pub mod fusion;
pub mod progress;
pub mod rerank;
pub mod snippet;

pub use chunker::{Chunk, chunk_document, chunk_document_with_limit};
pub use fusion::{
    RRF_CANDIDATES, RRF_K, RrfResult, blend_score, reciprocal_rank_fusion, rrf_blend_weight,
};
pub use progress::{Cursor, CursorGuard, Progress, format_eta, render_progress_bar};
pub use rerank::{BatchRerankResult, RERANK_BATCH_SIZE, RerankDocument, RerankResult, rerank_documents};
pub use snippet::extract_snippet;

use std::io::BufRead;
use std::time::Duration;

use serde::Deserialize;

use crate::config;
use crate::error::{QmdError, Result};

/// Request timeout for embedding and generation calls.
const LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// An embedding with the model that produced it.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub model: String,
}

/// Options for a single generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f64,
    /// Request per-token logprobs (used by the reranker).
    pub logprobs: bool,
    /// Skip the model's prompt template.
    pub raw: bool,
    pub stop: Vec<String>,
}

/// One generated token with its log probability.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub logprobs: Vec<TokenLogprob>,
    pub done: bool,
}

/// Availability info for a model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub exists: bool,
    pub size: Option<u64>,
    pub modified_at: Option<String>,
}

/// Progress of a model pull: (status line, completed bytes, total bytes).
pub type PullProgress<'a> = &'a mut dyn FnMut(&str, u64, u64);

/// The capability the core consumes for all model work.
pub trait LlmProvider: Send + Sync {
    /// Embed `text`. Queries and documents get different task prefixes;
    /// documents carry their title. `None` on any provider failure.
    fn embed(
        &self,
        text: &str,
        model: &str,
        is_query: bool,
        title: Option<&str>,
    ) -> Option<EmbeddingResult>;

    /// Run one generation. `None` on any provider failure.
    fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Option<GenerationResult>;

    /// Check whether the provider has `model` available locally.
    fn model_exists(&self, model: &str) -> Result<ModelInfo>;

    /// Ask the provider to download `model`. Returns true on success.
    fn pull_model(&self, model: &str, on_progress: Option<PullProgress>) -> Result<bool>;
}

/// Format a document chunk for embedding.
pub fn format_doc_for_embedding(text: &str, title: Option<&str>) -> String {
    format!("title: {} | text: {}", title.unwrap_or("none"), text)
}

/// Format a search query for embedding.
pub fn format_query_for_embedding(query: &str) -> String {
    format!("task: search result | query: {query}")
}

/// Instruction sent to the generation model for query expansion.
fn expansion_prompt(query: &str, count: usize) -> String {
    format!(
        "Generate {count} alternative phrasings of the search query below. \
         Keep proper nouns exactly as written, vary the other words with \
         synonyms, and answer with one variation per line and nothing else.\n\
         \n\
         Query: {query}\n"
    )
}

/// Remove `<think>…</think>` blocks a reasoning model may emit.
pub fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Ask the provider for `count` query variations.
///
/// The original query is always first in the returned list. `None` when
/// the provider call fails outright.
pub fn expand_query_variations(
    llm: &dyn LlmProvider,
    query: &str,
    model: &str,
    count: usize,
) -> Option<Vec<String>> {
    let result = llm.generate(
        &expansion_prompt(query, count),
        &GenerateOptions {
            model: model.to_string(),
            max_tokens: 200,
            temperature: 0.7,
            ..Default::default()
        },
    )?;

    let mut queries = vec![query.to_string()];
    for line in strip_think_blocks(&result.text).lines() {
        let line = line.trim().trim_start_matches(['-', '*', ' ']).trim();
        if (3..100).contains(&line.len()) && queries.len() <= count {
            queries.push(line.to_string());
        }
    }
    Some(queries)
}

/// Ollama-compatible HTTP provider.
pub struct Ollama {
    base_url: String,
    agent: ureq::Agent,
}

impl Ollama {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(LLM_TIMEOUT).build(),
        }
    }

    /// Provider at the `QMD_LLM_URL` endpoint (default localhost:11434).
    pub fn from_env() -> Self {
        Self::new(config::get_llm_base_url())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    model: Option<String>,
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    logprobs: Vec<TokenLogprob>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
    size: Option<u64>,
    modified_at: Option<String>,
}

#[derive(Deserialize)]
struct PullLine {
    #[serde(default)]
    status: String,
    #[serde(default)]
    completed: u64,
    #[serde(default)]
    total: u64,
    error: Option<String>,
}

impl LlmProvider for Ollama {
    fn embed(
        &self,
        text: &str,
        model: &str,
        is_query: bool,
        title: Option<&str>,
    ) -> Option<EmbeddingResult> {
        let input = if is_query {
            format_query_for_embedding(text)
        } else {
            format_doc_for_embedding(text, title)
        };

        let response = self
            .agent
            .post(&self.url("/api/embed"))
            .send_json(serde_json::json!({
                "model": model,
                "input": input,
            }))
            .ok()?;

        let parsed: EmbedResponse = response.into_json().ok()?;
        let embedding = parsed.embeddings.into_iter().next()?;
        if embedding.is_empty() {
            return None;
        }
        Some(EmbeddingResult {
            embedding,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
        })
    }

    fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Option<GenerationResult> {
        let mut body = serde_json::json!({
            "model": opts.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "num_predict": opts.max_tokens,
                "temperature": opts.temperature,
            },
        });
        if opts.raw {
            body["raw"] = serde_json::Value::Bool(true);
        }
        if opts.logprobs {
            body["logprobs"] = serde_json::Value::Bool(true);
        }
        if !opts.stop.is_empty() {
            body["options"]["stop"] = serde_json::json!(opts.stop);
        }

        let response = self
            .agent
            .post(&self.url("/api/generate"))
            .send_json(body)
            .ok()?;

        let parsed: GenerateResponse = response.into_json().ok()?;
        Some(GenerationResult {
            text: parsed.response,
            logprobs: parsed.logprobs,
            done: parsed.done,
        })
    }

    fn model_exists(&self, model: &str) -> Result<ModelInfo> {
        let response = self
            .agent
            .get(&self.url("/api/tags"))
            .call()
            .map_err(|e| QmdError::Llm(format!("could not list models: {e}")))?;

        let tags: TagsResponse = response
            .into_json()
            .map_err(|e| QmdError::Llm(format!("malformed tags response: {e}")))?;

        // "name" matches "name:latest" and vice versa.
        let found = tags.models.into_iter().find(|m| {
            m.name == model
                || m.name == format!("{model}:latest")
                || model == format!("{}:latest", m.name)
        });

        Ok(match found {
            Some(m) => ModelInfo {
                name: m.name,
                exists: true,
                size: m.size,
                modified_at: m.modified_at,
            },
            None => ModelInfo {
                name: model.to_string(),
                exists: false,
                size: None,
                modified_at: None,
            },
        })
    }

    fn pull_model(&self, model: &str, mut on_progress: Option<PullProgress>) -> Result<bool> {
        let response = self
            .agent
            .post(&self.url("/api/pull"))
            .send_json(serde_json::json!({ "model": model, "stream": true }))
            .map_err(|e| QmdError::Llm(format!("pull failed: {e}")))?;

        let reader = std::io::BufReader::new(response.into_reader());
        let mut succeeded = false;
        for line in reader.lines() {
            let line = line.map_err(|e| QmdError::Llm(format!("pull stream error: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(update) = serde_json::from_str::<PullLine>(&line) else {
                continue;
            };
            if let Some(err) = update.error {
                return Err(QmdError::Llm(format!("pull failed: {err}")));
            }
            if let Some(cb) = on_progress.as_mut() {
                cb(&update.status, update.completed, update.total);
            }
            if update.status == "success" {
                succeeded = true;
            }
        }
        Ok(succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_formatting() {
        assert_eq!(
            format_doc_for_embedding("body", Some("Title")),
            "title: Title | text: body"
        );
        assert_eq!(
            format_doc_for_embedding("body", None),
            "title: none | text: body"
        );
        assert_eq!(
            format_query_for_embedding("find me"),
            "task: search result | query: find me"
        );
    }

    #[test]
    fn think_blocks_stripped() {
        assert_eq!(
            strip_think_blocks("<think>reasoning</think>answer"),
            "answer"
        );
        assert_eq!(
            strip_think_blocks("a<think>x</think>b<think>y</think>c"),
            "abc"
        );
        assert_eq!(strip_think_blocks("no blocks"), "no blocks");
        // Unterminated block swallows the tail.
        assert_eq!(strip_think_blocks("head<think>oops"), "head");
    }
}
