//! Weighted reciprocal-rank fusion of the lexical and vector channels.
//!
//! Each channel contributes `weight / (rrf_k + rank)` for every chunk it
//! returns, with `rank` starting at 1. Scores from the two channels are on
//! different scales (BM25 vs cosine), so only ranks are fused.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionParams {
    pub lexical_weight: f32,
    pub vector_weight: f32,
    /// Rank damping constant.
    pub rrf_k: f32,
    /// Candidates fetched from the lexical channel.
    pub lexical_k: usize,
    /// Candidates fetched from the vector channel.
    pub vector_k: usize,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            lexical_weight: 0.6,
            vector_weight: 0.4,
            rrf_k: 60.0,
            lexical_k: 15,
            vector_k: 15,
        }
    }
}

/// One ranked channel: ids best-first, and the channel's weight.
#[derive(Debug, Clone, Copy)]
pub struct Ranking<'a> {
    pub ids: &'a [String],
    pub weight: f32,
}

/// Fuse rankings into `(id, score)` pairs, best first.
///
/// Ids are collected in first-seen order across rankings (earlier rankings
/// first) and the final sort is stable, so equal scores keep that order.
/// An id repeated inside one ranking only counts at its best rank.
pub fn reciprocal_rank_fusion<'a>(rankings: &[Ranking<'a>], rrf_k: f32) -> Vec<(&'a str, f32)> {
    let mut order: Vec<&'a str> = Vec::new();
    let mut scores: HashMap<&'a str, f32> = HashMap::new();

    for ranking in rankings {
        let mut seen: HashSet<&str> = HashSet::new();
        for (pos, id) in ranking.ids.iter().enumerate() {
            let id = id.as_str();
            if !seen.insert(id) {
                continue;
            }
            let contribution = ranking.weight / (rrf_k + (pos + 1) as f32);
            match scores.get_mut(id) {
                Some(s) => *s += contribution,
                None => {
                    order.push(id);
                    scores.insert(id, contribution);
                }
            }
        }
    }

    let mut fused: Vec<(&'a str, f32)> = order
        .into_iter()
        .map(|id| (id, scores.get(id).copied().unwrap_or(0.0)))
        .collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty() {
        assert!(reciprocal_rank_fusion(&[], 60.0).is_empty());
    }

    #[test]
    fn test_scores_follow_formula() {
        let lex = ids(&["a", "b"]);
        let vec = ids(&["b"]);
        let fused = reciprocal_rank_fusion(
            &[
                Ranking { ids: &lex, weight: 0.6 },
                Ranking { ids: &vec, weight: 0.4 },
            ],
            60.0,
        );
        assert_eq!(fused[0].0, "b");
        let expected_b = 0.6 / 62.0 + 0.4 / 61.0;
        assert!((fused[0].1 - expected_b).abs() < 1e-6);
        assert!((fused[1].1 - 0.6 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let lex = ids(&["a", "x"]);
        let vec = ids(&["b", "y"]);
        let fused = reciprocal_rank_fusion(
            &[
                Ranking { ids: &lex, weight: 0.5 },
                Ranking { ids: &vec, weight: 0.5 },
            ],
            60.0,
        );
        let order: Vec<&str> = fused.iter().map(|f| f.0).collect();
        assert_eq!(order, vec!["a", "b", "x", "y"]);
    }

    #[test]
    fn test_zero_weight_channel_only_appends() {
        let lex = ids(&["a"]);
        let vec = ids(&["b", "a"]);
        let fused = reciprocal_rank_fusion(
            &[
                Ranking { ids: &lex, weight: 1.0 },
                Ranking { ids: &vec, weight: 0.0 },
            ],
            60.0,
        );
        let order: Vec<&str> = fused.iter().map(|f| f.0).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(fused[1].1, 0.0);
    }

    #[test]
    fn test_duplicate_within_ranking_counts_once() {
        let lex = ids(&["a", "a"]);
        let fused = reciprocal_rank_fusion(&[Ranking { ids: &lex, weight: 1.0 }], 60.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_defaults() {
        let p = FusionParams::default();
        assert_eq!(p.lexical_k, 15);
        assert_eq!(p.vector_k, 15);
        assert_eq!(p.rrf_k, 60.0);
    }
}
