//! `phaply embed`: backfill child-chunk vectors for the current artifacts.
//!
//! Children whose text hash matches the stored vector are skipped unless
//! `--full` is given. Vectors for children no longer in the artifacts, or
//! written by another model, are removed.

use std::collections::HashSet;

use anyhow::{bail, Result};
use phaply_core::ChildChunk;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::rebuild::get_artifacts;
use crate::vector_store::{self, VectorRecord};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EmbedSummary {
    pub children: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: u64,
}

fn text_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

pub async fn run_embed(config: &Config, batch_size_override: Option<usize>, full: bool) -> Result<()> {
    let Some(embedder) = embedding::create_embedder(&config.embedding)? else {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    };
    let model = embedder.model_name().to_string();
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size).max(1);

    let artifacts = get_artifacts(config).await?;
    let pool = db::connect(config).await?;

    let mut summary = EmbedSummary {
        children: artifacts.children().len(),
        ..Default::default()
    };

    summary.removed += vector_store::delete_other_models(&pool, &model).await?;
    let stored = vector_store::stored_hashes(&pool, &model).await?;

    let live: HashSet<&str> = artifacts.children().iter().map(|c| c.id.as_str()).collect();
    let stale: Vec<String> = stored
        .keys()
        .filter(|id| !live.contains(id.as_str()))
        .cloned()
        .collect();
    summary.removed += vector_store::delete_vectors(&pool, &stale).await?;

    let pending: Vec<(&ChildChunk, String)> = artifacts
        .children()
        .iter()
        .map(|c| (c, text_hash(&c.text)))
        .filter(|(c, hash)| full || stored.get(&c.id) != Some(hash))
        .collect();
    summary.skipped = summary.children - pending.len();

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(vectors) => {
                for ((child, hash), vector) in batch.iter().zip(vectors.iter()) {
                    vector_store::upsert_vector(
                        &pool,
                        &model,
                        &VectorRecord {
                            chunk_id: &child.id,
                            parent_id: &child.parent_id,
                            document_id: &child.document_id,
                            content_hash: hash,
                            embedding: vector,
                        },
                    )
                    .await?;
                    summary.embedded += 1;
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {:#}", e);
                summary.failed += batch.len();
            }
        }
    }
    pool.close().await;

    println!("embed {}", model);
    println!("  children: {}", summary.children);
    println!("  embedded: {}", summary.embedded);
    println!("  skipped: {}", summary.skipped);
    println!("  failed: {}", summary.failed);
    println!("  removed: {}", summary.removed);
    if summary.failed > 0 {
        bail!("{} child chunk(s) could not be embedded", summary.failed);
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_hash_is_stable_and_distinct() {
        assert_eq!(text_hash("Điều 1"), text_hash("Điều 1"));
        assert_ne!(text_hash("Điều 1"), text_hash("Điều 2"));
        assert_eq!(text_hash("").len(), 64);
    }
}
