//! Reciprocal Rank Fusion.
//!
//! `score(d) = Σ_r 1 / (k + rank_r(d))` with 1-based ranks. A chunk found by
//! both rankers collects two contributions, so agreement between lexical and
//! semantic retrieval outranks a single strong position in one list.

use std::collections::HashMap;

use ragdb_core::types::{SearchResult, SourceKind};

/// Conventional constant from Cormack, Clarke and Buettcher (SIGIR 2009).
pub const RRF_K: f32 = 60.0;

/// Fuses ranked lists, the first list taking priority for content.
///
/// Content and metadata come from the first list that supplies a non-empty
/// value for a chunk. The output is sorted by descending fused score (ties
/// keep first-appearance order) and truncated to `top_k`.
pub fn reciprocal_rank_fusion(lists: &[&[SearchResult]], rrf_k: f32, top_k: usize) -> Vec<SearchResult> {
    let mut fused: Vec<SearchResult> = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();

    for list in lists {
        for (rank, hit) in list.iter().enumerate() {
            let contribution = 1.0 / (rrf_k + (rank + 1) as f32);
            match slots.get(hit.chunk_id.as_str()) {
                Some(&at) => {
                    let entry = &mut fused[at];
                    entry.score += contribution;
                    if entry.content.is_empty() && !hit.content.is_empty() {
                        entry.content = hit.content.clone();
                    }
                    if entry.metadata.as_ref().map_or(true, |m| m.is_empty()) && hit.metadata.is_some() {
                        entry.metadata = hit.metadata.clone();
                    }
                }
                None => {
                    slots.insert(hit.chunk_id.as_str(), fused.len());
                    fused.push(SearchResult { score: contribution, source: SourceKind::Fused, ..hit.clone() });
                }
            }
        }
    }

    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(top_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, content: &str) -> SearchResult {
        SearchResult { chunk_id: id.into(), content: content.into(), score: 0.0, metadata: None, source: SourceKind::Vector }
    }

    #[test]
    fn test_rrf() {
        let vector = vec![hit("1", "one"), hit("2", "two"), hit("3", "three")];
        let keyword = vec![hit("3", "three"), hit("1", "one"), hit("4", "four")];

        let fused = reciprocal_rank_fusion(&[vector.as_slice(), keyword.as_slice()], RRF_K, 10);

        // 1 and 3 appear in both lists.
        let top: Vec<&str> = fused.iter().take(2).map(|r| r.chunk_id.as_str()).collect();
        assert!(top.contains(&"1"));
        assert!(top.contains(&"3"));
        assert_eq!(fused.len(), 4);
        assert!(fused.iter().all(|r| r.source == SourceKind::Fused));

        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((fused[0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn first_non_empty_content_wins() {
        let vector = vec![hit("a", "")];
        let keyword = vec![hit("a", "from lexical")];
        let fused = reciprocal_rank_fusion(&[vector.as_slice(), keyword.as_slice()], RRF_K, 5);
        assert_eq!(fused[0].content, "from lexical");

        let vector = vec![hit("a", "from vector")];
        let fused = reciprocal_rank_fusion(&[vector.as_slice(), keyword.as_slice()], RRF_K, 5);
        assert_eq!(fused[0].content, "from vector");
    }

    #[test]
    fn equal_scores_keep_first_appearance() {
        let vector = vec![hit("v", "x")];
        let keyword = vec![hit("k", "y")];
        let fused = reciprocal_rank_fusion(&[vector.as_slice(), keyword.as_slice()], RRF_K, 5);
        assert_eq!(fused[0].chunk_id, "v");
        assert_eq!(fused[1].chunk_id, "k");
    }

    #[test]
    fn truncates_to_top_k() {
        let vector: Vec<SearchResult> = (0..10).map(|i| hit(&i.to_string(), "c")).collect();
        assert_eq!(reciprocal_rank_fusion(&[vector.as_slice()], RRF_K, 3).len(), 3);
        assert!(reciprocal_rank_fusion(&[vector.as_slice()], RRF_K, 0).is_empty());
    }
}
