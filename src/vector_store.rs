//! Child-chunk embeddings stored in SQLite.
//!
//! Vectors live in `child_vectors` as little-endian `f32` BLOBs, keyed by
//! child id and tagged with the model that produced them. Search is a
//! brute-force cosine scan over the rows of the active model.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use phaply_core::vector::{blob_to_vec, rank_by_cosine, vec_to_blob};
use phaply_core::{VectorHit, VectorIndex};
use sqlx::{Row, SqlitePool};

use crate::embedding::Embedder;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        Self { pool, embedder }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<VectorHit>> {
        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;

        let rows = sqlx::query(
            "SELECT chunk_id, parent_id, embedding FROM child_vectors WHERE model = ? ORDER BY chunk_id",
        )
        .bind(self.embedder.model_name())
        .fetch_all(&self.pool)
        .await?;

        let decoded: Vec<(String, String, Vec<f32>)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("chunk_id"), row.get("parent_id"), blob_to_vec(&blob))
            })
            .collect();

        Ok(rank_by_cosine(
            &query_vec,
            decoded
                .iter()
                .map(|(c, p, v)| (c.as_str(), p.as_str(), v.as_slice())),
            k,
        ))
    }
}

pub struct VectorRecord<'a> {
    pub chunk_id: &'a str,
    pub parent_id: &'a str,
    pub document_id: &'a str,
    pub content_hash: &'a str,
    pub embedding: &'a [f32],
}

pub async fn upsert_vector(pool: &SqlitePool, model: &str, record: &VectorRecord<'_>) -> Result<()> {
    if record.embedding.is_empty() {
        bail!("Refusing to store an empty embedding for {}", record.chunk_id);
    }
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO child_vectors (chunk_id, parent_id, document_id, model, dims, content_hash, embedding, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            parent_id = excluded.parent_id,
            document_id = excluded.document_id,
            model = excluded.model,
            dims = excluded.dims,
            content_hash = excluded.content_hash,
            embedding = excluded.embedding,
            created_at = excluded.created_at
        "#,
    )
    .bind(record.chunk_id)
    .bind(record.parent_id)
    .bind(record.document_id)
    .bind(model)
    .bind(record.embedding.len() as i64)
    .bind(record.content_hash)
    .bind(vec_to_blob(record.embedding))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Content hash of every stored vector for `model`, keyed by chunk id.
pub async fn stored_hashes(pool: &SqlitePool, model: &str) -> Result<HashMap<String, String>> {
    let rows = sqlx::query("SELECT chunk_id, content_hash FROM child_vectors WHERE model = ?")
        .bind(model)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get("chunk_id"), r.get("content_hash")))
        .collect())
}

pub async fn delete_vectors(pool: &SqlitePool, chunk_ids: &[String]) -> Result<u64> {
    let mut removed = 0;
    for id in chunk_ids {
        removed += sqlx::query("DELETE FROM child_vectors WHERE chunk_id = ?")
            .bind(id)
            .execute(pool)
            .await?
            .rows_affected();
    }
    Ok(removed)
}

/// Drop vectors written by any model other than `model`.
pub async fn delete_other_models(pool: &SqlitePool, model: &str) -> Result<u64> {
    Ok(sqlx::query("DELETE FROM child_vectors WHERE model != ?")
        .bind(model)
        .execute(pool)
        .await?
        .rows_affected())
}

pub async fn count_vectors(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM child_vectors")
        .fetch_one(pool)
        .await?)
}
