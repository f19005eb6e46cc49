//! The search engine: full-text, vector, query expansion, and hybrid
//! retrieval over one store and one LLM provider.
//!
//! The engine itself is stateless; everything persistent lives in the
//! store (including the expansion cache). Failure semantics: a missing
//! vector table downgrades hybrid to FTS-only, a missing rerank model
//! degrades to fused scores, and a missing embed model is fatal only for
//! vector-only searches.

use std::collections::HashMap;

use crate::error::{QmdError, Result};
use crate::llm::{
    LlmProvider, RERANK_BATCH_SIZE, RRF_CANDIDATES, RRF_K, RerankDocument, blend_score,
    expand_query_variations, reciprocal_rank_fusion, rerank_documents,
};
use crate::store::cache::{CACHE_MAX_ENTRIES, generate_cache_key};
use crate::store::{SearchResult, SearchSource, Store, parse_virtual_path};
use crate::config;

/// Variations requested from the expansion model.
const EXPANSION_COUNT: usize = 2;

/// Hits fetched per query before fusion.
const HYBRID_FETCH_LIMIT: usize = 20;

/// Options shared by the search operations.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub collection: Option<String>,
    pub limit: usize,
    pub min_score: Option<f64>,
}

/// Options for hybrid search.
#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub collection: Option<String>,
    pub limit: usize,
    pub min_score: Option<f64>,
    /// Expand the query through the LLM before searching.
    pub expand: bool,
    /// Rerank fused candidates through the LLM.
    pub rerank: bool,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            collection: None,
            limit: 10,
            min_score: None,
            expand: true,
            rerank: true,
        }
    }
}

/// Composition of store and provider behind the search operations.
pub struct SearchEngine<'a> {
    store: &'a Store,
    llm: &'a dyn LlmProvider,
    embed_model: String,
    query_model: String,
    rerank_model: String,
}

impl<'a> SearchEngine<'a> {
    /// Engine with model names from the environment.
    pub fn new(store: &'a Store, llm: &'a dyn LlmProvider) -> Self {
        Self {
            store,
            llm,
            embed_model: config::get_embed_model(),
            query_model: config::get_query_model(),
            rerank_model: config::get_rerank_model(),
        }
    }

    /// Engine with explicit model names.
    pub fn with_models(
        store: &'a Store,
        llm: &'a dyn LlmProvider,
        embed_model: impl Into<String>,
        query_model: impl Into<String>,
        rerank_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            llm,
            embed_model: embed_model.into(),
            query_model: query_model.into(),
            rerank_model: rerank_model.into(),
        }
    }

    /// BM25 full-text search.
    ///
    /// The score floor applies before the limit: the store is overfetched
    /// when a floor is set, then filtered, then truncated.
    pub fn search_fts(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let mut results =
            self.store
                .search_fts(query, fetch_limit(opts), opts.collection.as_deref())?;
        if let Some(min) = opts.min_score {
            results.retain(|r| r.score >= min);
        }
        results.truncate(opts.limit);
        Ok(results)
    }

    /// Semantic KNN search. Empty when no vector table exists; an
    /// unavailable embed model is an error here (there is nothing to
    /// degrade to). Filters by the score floor before truncating, like
    /// [`Self::search_fts`].
    pub fn search_vector(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        if !self.store.has_vector_table()? {
            return Ok(Vec::new());
        }
        let embedded = self
            .llm
            .embed(query, &self.embed_model, true, None)
            .ok_or_else(|| {
                QmdError::Llm(format!(
                    "could not embed query with model {}",
                    self.embed_model
                ))
            })?;
        let mut results = self.store.search_vec(
            &embedded.embedding,
            fetch_limit(opts),
            opts.collection.as_deref(),
        )?;
        if let Some(min) = opts.min_score {
            results.retain(|r| r.score >= min);
        }
        results.truncate(opts.limit);
        Ok(results)
    }

    /// Expand a query into variations, original first.
    ///
    /// Hits the persistent cache before the provider; a provider failure
    /// degrades to the original query alone.
    pub fn expand_query(&self, query: &str) -> Result<Vec<String>> {
        let key = generate_cache_key(
            "expandQuery",
            &serde_json::json!({ "model": self.query_model, "query": query }),
        );

        if let Some(cached) = self.store.cache_get(&key)? {
            let mut queries = vec![query.to_string()];
            queries.extend(cached.lines().map(str::to_string).filter(|l| !l.is_empty()));
            return Ok(queries);
        }

        match expand_query_variations(self.llm, query, &self.query_model, EXPANSION_COUNT) {
            Some(queries) => {
                let variations = queries[1..].join("\n");
                self.store
                    .cache_set_with_cleanup(&key, &variations, CACHE_MAX_ENTRIES)?;
                Ok(queries)
            }
            None => Ok(vec![query.to_string()]),
        }
    }

    /// Hybrid retrieval: expansion, FTS + vector per query, RRF fusion,
    /// optional rerank, and score blending into one ordered list.
    pub fn search_hybrid(&self, query: &str, opts: &HybridOptions) -> Result<Vec<SearchResult>> {
        let queries = if opts.expand {
            self.expand_query(query)?
        } else {
            vec![query.to_string()]
        };

        let has_vec = self.store.has_vector_table()?;
        let collection = opts.collection.as_deref();

        // One rank list per non-empty result set. Lists derived from the
        // original query weigh double.
        let mut lists: Vec<Vec<String>> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        let mut docs: HashMap<String, SearchResult> = HashMap::new();

        for (i, q) in queries.iter().enumerate() {
            let weight = if i == 0 { 2.0 } else { 1.0 };

            let fts = self.store.search_fts(q, HYBRID_FETCH_LIMIT, collection)?;
            if !fts.is_empty() {
                lists.push(collect_keys(&fts, &mut docs));
                weights.push(weight);
            }

            if has_vec
                && let Some(embedded) = self.llm.embed(q, &self.embed_model, true, None)
            {
                let vec_hits =
                    self.store
                        .search_vec(&embedded.embedding, HYBRID_FETCH_LIMIT, collection)?;
                if !vec_hits.is_empty() {
                    lists.push(collect_keys(&vec_hits, &mut docs));
                    weights.push(weight);
                }
            }
        }

        if lists.is_empty() {
            return Ok(Vec::new());
        }

        let mut fused = reciprocal_rank_fusion(&lists, Some(&weights), RRF_K);
        fused.truncate(RRF_CANDIDATES);

        let rerank_scores = if opts.rerank {
            self.rerank_candidates(query, &fused)?
        } else {
            None
        };

        let mut results: Vec<SearchResult> = fused
            .iter()
            .enumerate()
            .filter_map(|(idx, cand)| {
                let mut hit = docs.get(&cand.key)?.clone();
                hit.source = SearchSource::Hybrid;
                hit.score = match &rerank_scores {
                    Some(scores) => {
                        let rerank = scores.get(&cand.key).copied().unwrap_or(0.3);
                        blend_score(idx + 1, rerank)
                    }
                    // No reranker: the fused score is the final score.
                    None => cand.score,
                };
                Some(hit)
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(min) = opts.min_score {
            results.retain(|r| r.score >= min);
        }
        results.truncate(opts.limit);
        Ok(results)
    }

    /// Run the reranker over fused candidates. `None` when the model is
    /// unavailable (hybrid degrades to fused ordering).
    fn rerank_candidates(
        &self,
        query: &str,
        fused: &[crate::llm::RrfResult],
    ) -> Result<Option<HashMap<String, f64>>> {
        let available = self
            .llm
            .model_exists(&self.rerank_model)
            .map(|info| info.exists)
            .unwrap_or(false);
        if !available || fused.is_empty() {
            return Ok(None);
        }

        let mut rerank_docs = Vec::with_capacity(fused.len());
        for cand in fused {
            let Some((coll, path)) = parse_virtual_path(&cand.key) else {
                continue;
            };
            let Some(doc) = self.store.get_document(&coll, &path)? else {
                continue;
            };
            rerank_docs.push(RerankDocument {
                file: cand.key.clone(),
                text: doc.body.unwrap_or_default(),
                title: Some(doc.title),
            });
        }

        let batch = rerank_documents(
            self.llm,
            query,
            &rerank_docs,
            &self.rerank_model,
            RERANK_BATCH_SIZE,
        );
        Ok(Some(
            batch
                .results
                .into_iter()
                .map(|r| (r.file, r.score))
                .collect(),
        ))
    }
}

/// Store fetch size for the single-signal searches.
///
/// With a score floor set, rows are overfetched so hits dropped by the
/// floor cannot starve the limit; without one, the limit passes through.
fn fetch_limit(opts: &SearchOptions) -> usize {
    if opts.min_score.is_some() {
        opts.limit.saturating_mul(20).max(200)
    } else {
        opts.limit
    }
}

/// Record hits into the shared doc map and return their key list.
fn collect_keys(
    hits: &[SearchResult],
    docs: &mut HashMap<String, SearchResult>,
) -> Vec<String> {
    hits.iter()
        .map(|hit| {
            let key = hit.doc.filepath.clone();
            docs.entry(key.clone()).or_insert_with(|| hit.clone());
            key
        })
        .collect()
}
