//! `phaply stats`: what is stored and what is indexed.
//!
//! Reads the artifact cache without rebuilding it, so a missing cache is
//! reported rather than created.

use anyhow::Result;

use phaply_core::artifacts::SCHEMA_VERSION;

use crate::config::Config;
use crate::db;
use crate::document_store::count_documents;
use crate::rebuild::read_artifacts;
use crate::vector_store::count_vectors;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let documents = count_documents(&pool).await?;
    let relations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_relations")
        .fetch_one(&pool)
        .await?;
    let vectors = count_vectors(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Phaply Index Stats");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Documents:   {}", documents);
    println!("  Relations:   {}", relations);
    println!();
    println!("  Artifacts:   {}", config.artifacts.cache_path.display());
    match read_artifacts(&config.artifacts.cache_path)? {
        Some(artifacts) => {
            let children = artifacts.children().len() as i64;
            println!("  Schema:      v{}", SCHEMA_VERSION);
            println!("  Built:       {}", format_ts(artifacts.built_at));
            println!("  Parents:     {}", artifacts.parents().len());
            println!("  Children:    {}", children);
            println!("  Lexicon:     {} words", artifacts.segmenter().lexicon_len());
            println!(
                "  Embedded:    {} / {} ({}%)",
                vectors,
                children,
                if children > 0 { (vectors * 100) / children } else { 0 }
            );
        }
        None => {
            println!("  (not built, run `phaply rebuild`)");
            println!("  Embedded:    {}", vectors);
        }
    }

    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
