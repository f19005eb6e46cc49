//! Reciprocal Rank Fusion and hybrid score blending.
//!
//! Fusion operates on opaque document keys (virtual paths) so it stays
//! independent of where the rank lists came from.

use std::collections::HashMap;

/// RRF constant; higher values flatten the contribution of top ranks.
pub const RRF_K: usize = 60;

/// How many fused candidates move on to reranking.
pub const RRF_CANDIDATES: usize = 30;

/// A fused document with its combined score.
#[derive(Debug, Clone)]
pub struct RrfResult {
    /// Document key, `qmd://{collection}/{path}`.
    pub key: String,
    /// Weighted RRF sum plus best-rank bonus.
    pub score: f64,
    /// Best (smallest) 0-based rank across all input lists.
    pub best_rank: usize,
}

/// Fuse rank lists of document keys with Reciprocal Rank Fusion.
///
/// Each document scores `Σ wᵢ / (k + rankᵢ + 1)` over the lists that
/// contain it (0-based ranks), plus a bonus for showing up at the very
/// top of any list: +0.05 for rank 0, +0.02 for ranks 1-2. Results sort
/// by score descending; ties keep first-seen order.
pub fn reciprocal_rank_fusion(
    lists: &[Vec<String>],
    weights: Option<&[f64]>,
    k: usize,
) -> Vec<RrfResult> {
    let mut scores: HashMap<&str, (f64, usize, usize)> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for (list_idx, list) in lists.iter().enumerate() {
        let weight = weights
            .and_then(|w| w.get(list_idx).copied())
            .unwrap_or(1.0);
        for (rank, key) in list.iter().enumerate() {
            let entry = scores.entry(key.as_str()).or_insert_with(|| {
                order.push(key.as_str());
                (0.0, usize::MAX, order.len() - 1)
            });
            entry.0 += weight / (k as f64 + rank as f64 + 1.0);
            entry.1 = entry.1.min(rank);
        }
    }

    let mut fused: Vec<RrfResult> = order
        .iter()
        .map(|key| {
            let (mut score, best_rank, _) = scores[key];
            if best_rank == 0 {
                score += 0.05;
            } else if best_rank <= 2 {
                score += 0.02;
            }
            RrfResult {
                key: (*key).to_string(),
                score,
                best_rank,
            }
        })
        .collect();

    // Stable sort keeps insertion order for equal scores.
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

/// RRF weight applied at blend time, by 1-based fused rank.
///
/// Top fused candidates trust the fusion ordering; the tail leans on the
/// reranker.
pub fn rrf_blend_weight(rrf_rank: usize) -> f64 {
    if rrf_rank <= 3 {
        0.75
    } else if rrf_rank <= 10 {
        0.60
    } else {
        0.40
    }
}

/// Blend a fused rank with a rerank score into the final ordering key.
pub fn blend_score(rrf_rank: usize, rerank_score: f64) -> f64 {
    let w = rrf_blend_weight(rrf_rank);
    w * (1.0 / rrf_rank as f64) + (1.0 - w) * rerank_score
}
