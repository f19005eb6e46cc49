//! LLM-based relevance reranking.
//!
//! Each candidate document gets a single yes/no generation with token
//! logprobs; the answer token and its confidence turn into a relevance
//! score. Provider failures score neutral instead of raising.

use crate::llm::{GenerateOptions, LlmProvider, strip_think_blocks};

/// Documents reranked concurrently per batch.
pub const RERANK_BATCH_SIZE: usize = 5;

/// Characters of document body included in the rerank prompt.
const RERANK_DOC_CHARS: usize = 2000;

/// A document handed to the reranker.
#[derive(Debug, Clone)]
pub struct RerankDocument {
    /// Virtual path identifying the document.
    pub file: String,
    pub text: String,
    pub title: Option<String>,
}

/// Relevance verdict for one document.
#[derive(Debug, Clone)]
pub struct RerankResult {
    pub file: String,
    /// Position of the document in the input list.
    pub index: usize,
    pub relevant: bool,
    /// `exp(logprob)` of the answer token.
    pub confidence: f64,
    /// Blendable score in [0, 1]; 0.3 when the answer was unusable.
    pub score: f64,
    pub raw_token: String,
    pub logprob: f64,
}

/// All verdicts for one rerank run, sorted by score descending.
#[derive(Debug, Clone)]
pub struct BatchRerankResult {
    pub results: Vec<RerankResult>,
    pub model: String,
}

fn rerank_prompt(query: &str, doc: &RerankDocument) -> String {
    let body: String = doc.text.chars().take(RERANK_DOC_CHARS).collect();
    format!(
        "Query: {query}\n\n\
         Document title: {}\n\
         Document:\n{body}\n\n\
         Is this document relevant to the query? Answer with a single word, yes or no.\n\
         Answer:",
        doc.title.as_deref().unwrap_or("none"),
    )
}

/// Score a generation into a verdict. `None` generations are neutral.
fn score_response(
    file: &str,
    index: usize,
    response: Option<(String, Option<(String, f64)>)>,
) -> RerankResult {
    let neutral = |raw: String| RerankResult {
        file: file.to_string(),
        index,
        relevant: false,
        confidence: 0.0,
        score: 0.3,
        raw_token: raw,
        logprob: 0.0,
    };

    let Some((text, first_logprob)) = response else {
        return neutral(String::new());
    };

    // Prefer the logprob'd token; fall back to the visible text with full
    // confidence when the provider did not return logprobs.
    let (token, logprob) = match first_logprob {
        Some((token, lp)) => (token, lp),
        None => (strip_think_blocks(&text).trim().to_string(), 0.0),
    };

    let confidence = logprob.exp();
    let normalized = token.trim().to_lowercase();

    if normalized.starts_with("yes") {
        RerankResult {
            file: file.to_string(),
            index,
            relevant: true,
            confidence,
            score: 0.5 + 0.5 * confidence,
            raw_token: token,
            logprob,
        }
    } else if normalized.starts_with("no") {
        RerankResult {
            file: file.to_string(),
            index,
            relevant: false,
            confidence,
            score: 0.5 * (1.0 - confidence),
            raw_token: token,
            logprob,
        }
    } else {
        let mut r = neutral(token);
        r.confidence = confidence;
        r
    }
}

/// Rerank `docs` against `query` with the given model.
///
/// Documents are processed in batches of `batch_size`, each batch fanned
/// out on scoped threads so the network calls overlap. The store is never
/// touched from here.
pub fn rerank_documents(
    llm: &dyn LlmProvider,
    query: &str,
    docs: &[RerankDocument],
    model: &str,
    batch_size: usize,
) -> BatchRerankResult {
    let batch_size = batch_size.max(1);
    let mut results: Vec<RerankResult> = Vec::with_capacity(docs.len());

    for (batch_idx, batch) in docs.chunks(batch_size).enumerate() {
        let batch_results = std::thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .enumerate()
                .map(|(i, doc)| {
                    let index = batch_idx * batch_size + i;
                    scope.spawn(move || {
                        let prompt = rerank_prompt(query, doc);
                        let response = llm
                            .generate(
                                &prompt,
                                &GenerateOptions {
                                    model: model.to_string(),
                                    max_tokens: 3,
                                    temperature: 0.0,
                                    logprobs: true,
                                    stop: vec!["\n".to_string()],
                                    ..Default::default()
                                },
                            )
                            .map(|g| {
                                let first = g
                                    .logprobs
                                    .first()
                                    .map(|t| (t.token.clone(), t.logprob));
                                (g.text, first)
                            });
                        score_response(&doc.file, index, response)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rerank worker panicked"))
                .collect::<Vec<_>>()
        });
        results.extend(batch_results);
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });

    BatchRerankResult {
        results,
        model: model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_with_confidence() {
        let r = score_response("f", 0, Some(("yes".into(), Some(("yes".into(), -0.1)))));
        assert!(r.relevant);
        let conf = (-0.1f64).exp();
        assert!((r.score - (0.5 + 0.5 * conf)).abs() < 1e-12);
        assert!((r.confidence - conf).abs() < 1e-12);
    }

    #[test]
    fn no_with_confidence() {
        let r = score_response("f", 0, Some(("no".into(), Some(("no".into(), -0.2)))));
        assert!(!r.relevant);
        let conf = (-0.2f64).exp();
        assert!((r.score - 0.5 * (1.0 - conf)).abs() < 1e-12);
    }

    #[test]
    fn unknown_token_is_neutral() {
        let r = score_response("f", 0, Some(("maybe".into(), Some(("maybe".into(), -0.5)))));
        assert!(!r.relevant);
        assert!((r.score - 0.3).abs() < 1e-12);
    }

    #[test]
    fn failed_generation_is_neutral() {
        let r = score_response("f", 3, None);
        assert_eq!(r.index, 3);
        assert!((r.score - 0.3).abs() < 1e-12);
        assert!(r.raw_token.is_empty());
    }

    #[test]
    fn text_fallback_without_logprobs() {
        // Full confidence when the provider returned no logprobs.
        let r = score_response("f", 0, Some(("Yes".into(), None)));
        assert!(r.relevant);
        assert!((r.score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn case_insensitive_tokens() {
        let r = score_response("f", 0, Some(("YES.".into(), Some(("YES.".into(), 0.0)))));
        assert!(r.relevant);
        let r = score_response("f", 0, Some(("No,".into(), Some(("No,".into(), 0.0)))));
        assert!(!r.relevant);
        assert!((r.score - 0.0).abs() < 1e-12);
    }
}
