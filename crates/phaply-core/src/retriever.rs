//! Hybrid retrieval over the lexical index and an optional vector index.
//!
//! # Algorithm
//!
//! 1. Segment the query into words with the segmenter stored in the
//!    artifacts.
//! 2. Fetch `lexical_k` children from BM25 and `vector_k` children from the
//!    vector index, both for the segmented query.
//! 3. Fuse the two rankings with weighted reciprocal-rank fusion.
//! 4. Map fused children to their parents, keeping the first occurrence of
//!    each parent id.
//! 5. Resolve parents from the artifacts, skipping ids that do not resolve.
//!
//! A failing vector channel is logged and the query continues lexical-only.
//! Results are deterministic for fixed artifacts, index and query.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::artifacts::RetrievalArtifacts;
use crate::fusion::{reciprocal_rank_fusion, FusionParams, Ranking};
use crate::models::ParentChunk;
use crate::vector::VectorIndex;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("lexical index refers to child #{position}, but only {children} children exist")]
    CorruptIndex { position: usize, children: usize },
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Parents relevant to `query`, most relevant first, without duplicates.
    async fn retrieve(&self, query: &str) -> Result<Vec<ParentChunk>, RetrievalError>;
}

#[async_trait]
impl<T: Retriever + ?Sized> Retriever for Arc<T> {
    async fn retrieve(&self, query: &str) -> Result<Vec<ParentChunk>, RetrievalError> {
        (**self).retrieve(query).await
    }
}

pub struct HybridRetriever {
    artifacts: Arc<RetrievalArtifacts>,
    vector: Option<Arc<dyn VectorIndex>>,
    params: FusionParams,
}

impl HybridRetriever {
    pub fn new(artifacts: Arc<RetrievalArtifacts>, params: FusionParams) -> Self {
        Self {
            artifacts,
            vector: None,
            params,
        }
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector = Some(index);
        self
    }

    pub fn artifacts(&self) -> &Arc<RetrievalArtifacts> {
        &self.artifacts
    }

    pub fn params(&self) -> FusionParams {
        self.params
    }

    /// Fused child ranking as `(child_id, parent_id, score)`, best first.
    pub async fn ranked_children(&self, query: &str) -> Result<Vec<(String, String, f32)>, RetrievalError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let tokens = self.artifacts.segmenter().segment(query);
        let children = self.artifacts.children();

        let mut parent_of: HashMap<String, String> = HashMap::new();

        let mut lexical_ids = Vec::new();
        for (position, _score) in self.artifacts.lexical().search(&tokens, self.params.lexical_k) {
            let child = children.get(position).ok_or(RetrievalError::CorruptIndex {
                position,
                children: children.len(),
            })?;
            parent_of.insert(child.id.clone(), child.parent_id.clone());
            lexical_ids.push(child.id.clone());
        }

        let mut vector_ids = Vec::new();
        if let Some(index) = &self.vector {
            if self.params.vector_k > 0 && !tokens.is_empty() {
                match index.similarity_search(&tokens.join(" "), self.params.vector_k).await {
                    Ok(hits) => {
                        for hit in hits {
                            parent_of.entry(hit.chunk_id.clone()).or_insert(hit.parent_id);
                            vector_ids.push(hit.chunk_id);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %format!("{e:#}"), "vector search failed, using lexical results only");
                    }
                }
            }
        }

        let fused = reciprocal_rank_fusion(
            &[
                Ranking {
                    ids: &lexical_ids,
                    weight: self.params.lexical_weight,
                },
                Ranking {
                    ids: &vector_ids,
                    weight: self.params.vector_weight,
                },
            ],
            self.params.rrf_k,
        );

        Ok(fused
            .into_iter()
            .filter_map(|(id, score)| {
                parent_of
                    .get(id)
                    .map(|parent| (id.to_string(), parent.clone(), score))
            })
            .collect())
    }

    /// Resolved parents with the fused score of their best child, best
    /// first. Each parent appears once; unresolved ids are skipped.
    pub async fn ranked_parents(&self, query: &str) -> Result<Vec<(&ParentChunk, f32)>, RetrievalError> {
        let ranked = self.ranked_children(query).await?;

        let mut seen = HashSet::new();
        let mut parents = Vec::new();
        for (_, parent_id, score) in ranked {
            if !seen.insert(parent_id.clone()) {
                continue;
            }
            match self.artifacts.parent(&parent_id) {
                Some(p) => parents.push((p, score)),
                None => tracing::debug!(parent_id = %parent_id, "skipping unresolved parent"),
            }
        }
        Ok(parents)
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<ParentChunk>, RetrievalError> {
        Ok(self
            .ranked_parents(query)
            .await?
            .into_iter()
            .map(|(p, _)| p.clone())
            .collect())
    }
}
