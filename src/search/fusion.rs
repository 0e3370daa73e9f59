//! Reciprocal Rank Fusion for hybrid search

use std::collections::HashMap;

use super::result::{MatchType, SearchResult};

/// RRF contribution of the item at 0-based `rank`: `1 / (k + rank + 1)`.
pub fn rrf_term(k: f32, rank: usize) -> f32 {
    1.0 / (k + rank as f32 + 1.0)
}

/// Merge full-text and vector result lists using Reciprocal Rank Fusion
///
/// Each list must already be in rank order. An item's fused score is the sum
/// of its RRF terms over every list it appears in, so appearing in both lists
/// always beats appearing in one at the same rank. Output is sorted by fused
/// score descending, then item id ascending, and truncated to `limit`.
///
/// Snippets from the full-text side are kept.
pub fn fuse_results(
    text_results: Vec<SearchResult>,
    vector_results: Vec<SearchResult>,
    k: f32,
    limit: usize,
) -> Vec<SearchResult> {
    let mut fused: HashMap<i64, SearchResult> = HashMap::new();

    for list in [text_results, vector_results] {
        for (rank, result) in list.into_iter().enumerate() {
            let term = rrf_term(k, rank);
            fused
                .entry(result.id())
                .and_modify(|existing| existing.score += term)
                .or_insert_with(|| SearchResult {
                    score: term,
                    match_type: MatchType::Hybrid,
                    ..result
                });
        }
    }

    let mut merged: Vec<SearchResult> = fused.into_values().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id().cmp(&b.id())));
    merged.truncate(limit);
    merged
}
