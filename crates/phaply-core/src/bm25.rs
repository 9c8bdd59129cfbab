//! Okapi BM25 over pre-segmented token lists.
//!
//! The index never tokenizes text itself: callers pass the output of
//! [`Segmenter`](crate::segment::Segmenter) for both documents and queries,
//! so Vietnamese multi-syllable words are matched as units.
//!
//! Scoring follows BM25Okapi: `idf(t) = ln((N - df + 0.5) / (df + 0.5))`,
//! with non-positive idf values (terms present in half the corpus or more)
//! replaced by `epsilon × mean(idf)`. On very small corpora that mean is
//! itself non-positive, so the floor never drops below [`MIN_IDF`]: every
//! child matching a query term scores above zero.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lowest idf a matching term can carry.
pub const MIN_IDF: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization, 0 = none, 1 = full.
    pub b: f32,
    /// Floor factor for negative idf values.
    pub epsilon: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Posting {
    doc: u32,
    tf: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Index {
    params: Bm25Params,
    doc_lengths: Vec<u32>,
    avg_doc_length: f32,
    postings: HashMap<String, Vec<Posting>>,
    idf: HashMap<String, f32>,
}

impl Bm25Index {
    /// Build an index where document `i` is `docs[i]`.
    pub fn build(docs: &[Vec<String>], params: Bm25Params) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(docs.len());

        for (doc, tokens) in docs.iter().enumerate() {
            doc_lengths.push(tokens.len() as u32);
            let mut tf: HashMap<&str, u32> = HashMap::new();
            for t in tokens {
                *tf.entry(t.as_str()).or_insert(0) += 1;
            }
            for (term, count) in tf {
                postings.entry(term.to_string()).or_default().push(Posting {
                    doc: doc as u32,
                    tf: count,
                });
            }
        }

        let n = docs.len() as f32;
        let total_len: u64 = doc_lengths.iter().map(|&l| l as u64).sum();
        let avg_doc_length = if docs.is_empty() {
            0.0
        } else {
            total_len as f32 / n
        };

        let mut idf: HashMap<String, f32> = HashMap::with_capacity(postings.len());
        let mut idf_sum = 0.0f32;
        let mut negative = Vec::new();
        for (term, list) in &postings {
            let df = list.len() as f32;
            let value = ((n - df + 0.5) / (df + 0.5)).ln();
            idf_sum += value;
            if value <= 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }
        if !idf.is_empty() {
            let floor = (params.epsilon * idf_sum / idf.len() as f32).max(MIN_IDF);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            params,
            doc_lengths,
            avg_doc_length,
            postings,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Return up to `limit` `(doc, score)` pairs for documents matching at
    /// least one query term, best first; equal scores are ordered by
    /// document position.
    pub fn search(&self, query: &[String], limit: usize) -> Vec<(usize, f32)> {
        if self.is_empty() || query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let k1 = self.params.k1;
        let b = self.params.b;
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for term in query {
            let (Some(list), Some(&idf)) = (self.postings.get(term), self.idf.get(term)) else {
                continue;
            };
            for p in list {
                let dl = self.doc_lengths[p.doc as usize] as f32;
                let norm = if self.avg_doc_length > 0.0 {
                    1.0 - b + b * dl / self.avg_doc_length
                } else {
                    1.0
                };
                let tf = p.tf as f32;
                *scores.entry(p.doc).or_insert(0.0) += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().map(|(d, s)| (d as usize, s)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn corpus() -> Bm25Index {
        let docs = vec![
            toks("người_lao_động được nghỉ phép năm"),
            toks("doanh_nghiệp phải đóng bảo_hiểm_xã_hội cho người_lao_động"),
            toks("mức phạt vi_phạm giao_thông đường_bộ nồng_độ_cồn"),
            toks("người_lao_động người_lao_động người_lao_động tiền_lương"),
        ];
        Bm25Index::build(&docs, Bm25Params::default())
    }

    #[test]
    fn test_empty_index() {
        let idx = Bm25Index::build(&[], Bm25Params::default());
        assert!(idx.is_empty());
        assert!(idx.search(&toks("bất_kỳ"), 15).is_empty());
    }

    #[test]
    fn test_empty_query() {
        assert!(corpus().search(&[], 15).is_empty());
    }

    #[test]
    fn test_unknown_term() {
        assert!(corpus().search(&toks("hôn_nhân"), 15).is_empty());
    }

    #[test]
    fn test_rare_term_ranks_its_document() {
        let hits = corpus().search(&toks("nồng_độ_cồn"), 15);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 2);
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn test_term_frequency_raises_score() {
        let hits = corpus().search(&toks("tiền_lương người_lao_động"), 15);
        assert_eq!(hits[0].0, 3);
    }

    #[test]
    fn test_limit() {
        let idx = corpus();
        let hits = idx.search(&toks("người_lao_động"), 2);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_ties_ordered_by_position() {
        let docs = vec![toks("a x"), toks("b y"), toks("a x"), toks("c z")];
        let idx = Bm25Index::build(&docs, Bm25Params::default());
        let hits = idx.search(&toks("a"), 15);
        let order: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(order, vec![0, 2]);
    }

    #[test]
    fn test_common_term_gets_positive_floor() {
        // "chung" appears in 3 of 4 docs: raw idf is negative, floored to epsilon × mean.
        let docs = vec![toks("chung a"), toks("chung b"), toks("chung c"), toks("d e")];
        let idx = Bm25Index::build(&docs, Bm25Params::default());
        let hits = idx.search(&toks("chung"), 15);
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.1 > 0.0));
    }

    #[test]
    fn test_single_child_corpus_matches() {
        // With one document every raw idf is negative.
        let idx = Bm25Index::build(&[toks("thời_gian thử_việc không quá 60 ngày")], Bm25Params::default());
        let hits = idx.search(&toks("thử_việc"), 15);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 > 0.0);
        assert!(idx.search(&toks("hôn_nhân"), 15).is_empty());
    }

    #[test]
    fn test_two_child_corpus_matches_unique_term() {
        let docs = vec![toks("người_lao_động nghỉ phép"), toks("người_lao_động tiền_lương")];
        let idx = Bm25Index::build(&docs, Bm25Params::default());
        let hits = idx.search(&toks("phép"), 15);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);

        let both = idx.search(&toks("người_lao_động"), 15);
        assert_eq!(both.iter().map(|h| h.0).collect::<Vec<_>>(), vec![0, 1]);
        assert!(both.iter().all(|h| h.1 > 0.0));
    }
}
