//! Semantic channel of the hybrid retriever.
//!
//! [`VectorIndex`] is the seam the retriever searches through; it takes the
//! query as text so each implementation owns its own query embedding.
//! [`MemoryVectorIndex`] is a brute-force cosine index over caller-supplied
//! vectors, used in tests and small deployments. The SQLite-backed index
//! lives in the `phaply` app crate.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A child chunk matched by the vector channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk_id: String,
    pub parent_id: String,
    /// Cosine similarity, higher is closer.
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `k` child chunks most similar to `query`, best first.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<VectorHit>>;
}

/// Turns query text into a vector for [`MemoryVectorIndex`].
pub trait QueryEmbedder: Send + Sync {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

impl<F> QueryEmbedder for F
where
    F: Fn(&str) -> Result<Vec<f32>> + Send + Sync,
{
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self(text)
    }
}

struct Entry {
    chunk_id: String,
    parent_id: String,
    vector: Vec<f32>,
}

pub struct MemoryVectorIndex<E> {
    embedder: E,
    entries: Vec<Entry>,
}

impl<E: QueryEmbedder> MemoryVectorIndex<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, chunk_id: impl Into<String>, parent_id: impl Into<String>, vector: Vec<f32>) {
        self.entries.push(Entry {
            chunk_id: chunk_id.into(),
            parent_id: parent_id.into(),
            vector,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<E: QueryEmbedder> VectorIndex for MemoryVectorIndex<E> {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<VectorHit>> {
        let query_vec = self.embedder.embed_query(query)?;
        Ok(rank_by_cosine(
            &query_vec,
            self.entries
                .iter()
                .map(|e| (e.chunk_id.as_str(), e.parent_id.as_str(), e.vector.as_slice())),
            k,
        ))
    }
}

/// Score every candidate against `query_vec` and keep the `k` best.
/// Equal scores keep candidate order.
pub fn rank_by_cosine<'a, I>(query_vec: &[f32], candidates: I, k: usize) -> Vec<VectorHit>
where
    I: IntoIterator<Item = (&'a str, &'a str, &'a [f32])>,
{
    let mut hits: Vec<VectorHit> = candidates
        .into_iter()
        .map(|(chunk_id, parent_id, v)| VectorHit {
            chunk_id: chunk_id.to_string(),
            parent_id: parent_id.to_string(),
            score: cosine_similarity(query_vec, v),
        })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(k);
    hits
}

/// Pack a vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]; trailing bytes that do not fill an `f32`
/// are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, mismatched or zero
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
