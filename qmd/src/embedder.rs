//! Embedding: vectorize every content hash that still needs it.
//!
//! Targets are hashes with at least one active document and no `seq = 0`
//! vector for the requested model. Bodies are chunked, chunk embeddings
//! land in `content_vectors` + `vectors_vec`, and the first embedding
//! locks the KNN table dimension. Individual failures are counted, never
//! fatal.

use chrono::Utc;

use crate::error::{QmdError, Result};
use crate::llm::{LlmProvider, chunk_document};
use crate::store::Store;

/// Counters from one embedding run.
#[derive(Debug, Clone, Default)]
pub struct EmbedResult {
    pub documents: usize,
    pub chunks_embedded: usize,
    pub errors: usize,
    pub skipped_empty: usize,
    /// Vectors cleared up front by `force`.
    pub cleared: usize,
}

/// Progress snapshot passed to the callback after every chunk.
#[derive(Debug, Clone, Copy)]
pub struct EmbedProgress {
    pub bytes_processed: usize,
    pub total_bytes: usize,
    pub chunks_done: usize,
    pub total_chunks: usize,
    pub errors: usize,
}

/// Embedding progress callback.
pub type EmbedProgressFn<'a> = &'a mut dyn FnMut(&EmbedProgress);

struct ChunkItem {
    hash: String,
    title: Option<String>,
    seq: usize,
    pos: usize,
    text: String,
    bytes: usize,
}

/// Embed everything pending for `model`. With `force`, all existing
/// vectors are dropped first and the whole corpus re-embeds.
pub fn embed_documents(
    store: &Store,
    llm: &dyn LlmProvider,
    model: &str,
    force: bool,
    mut progress: Option<EmbedProgressFn>,
) -> Result<EmbedResult> {
    let mut result = EmbedResult::default();

    if force {
        result.cleared = store.clear_embeddings()?;
    }

    let pending = store.get_hashes_needing_embedding(model)?;
    if pending.is_empty() {
        return Ok(result);
    }

    // Chunk up front so totals are known for progress reporting.
    let mut chunks: Vec<ChunkItem> = Vec::new();
    for (hash, path, body) in &pending {
        if body.is_empty() {
            result.skipped_empty += 1;
            continue;
        }
        result.documents += 1;
        let title = Store::extract_title(body).or_else(|| {
            std::path::Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
        });
        for (seq, chunk) in chunk_document(body).into_iter().enumerate() {
            chunks.push(ChunkItem {
                hash: hash.clone(),
                title: title.clone(),
                seq,
                pos: chunk.pos,
                bytes: chunk.text.len(),
                text: chunk.text,
            });
        }
    }

    if chunks.is_empty() {
        return Ok(result);
    }

    let total_bytes: usize = chunks.iter().map(|c| c.bytes).sum();
    let total_chunks = chunks.len();
    let now = Utc::now().to_rfc3339();
    let mut bytes_processed = 0usize;
    let mut pulled = false;

    for (i, chunk) in chunks.iter().enumerate() {
        let embedded = embed_with_pull(llm, model, chunk, &mut pulled)?;

        match embedded {
            Some(embedding) => {
                // The first successful embedding fixes the dimension.
                if i == 0 || !store.has_vector_table()? {
                    store.ensure_vector_table(embedding.embedding.len())?;
                }
                store.insert_embedding(
                    &chunk.hash,
                    chunk.seq,
                    chunk.pos,
                    &embedding.embedding,
                    &embedding.model,
                    &now,
                )?;
                result.chunks_embedded += 1;
            }
            None => result.errors += 1,
        }

        bytes_processed += chunk.bytes;
        if let Some(cb) = progress.as_mut() {
            cb(&EmbedProgress {
                bytes_processed,
                total_bytes,
                chunks_done: i + 1,
                total_chunks,
                errors: result.errors,
            });
        }
    }

    Ok(result)
}

/// Embed one chunk, pulling the model once if it is missing.
fn embed_with_pull(
    llm: &dyn LlmProvider,
    model: &str,
    chunk: &ChunkItem,
    pulled: &mut bool,
) -> Result<Option<crate::llm::EmbeddingResult>> {
    let title = chunk.title.as_deref();
    if let Some(embedding) = llm.embed(&chunk.text, model, false, title) {
        return Ok(Some(embedding));
    }

    if !*pulled {
        *pulled = true;
        let missing = match llm.model_exists(model) {
            Ok(info) => !info.exists,
            Err(QmdError::Llm(_)) => false,
            Err(e) => return Err(e),
        };
        if missing && llm.pull_model(model, None)? {
            return Ok(llm.embed(&chunk.text, model, false, title));
        }
    }
    Ok(None)
}
