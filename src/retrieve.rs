//! `phaply retrieve` and `phaply ask`.

use anyhow::Result;

use crate::config::Config;
use crate::query::{build_retriever, build_service};

/// Print the parents the retriever returns for `query`, best first, with
/// the fused score of each parent's best child.
pub async fn run_retrieve(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let (retriever, _) = build_retriever(config).await?;
    let ranked = retriever.ranked_parents(query).await?;
    let shown = limit.map_or(ranked.len(), |l| l.min(ranked.len()));

    for (i, (parent, score)) in ranked.into_iter().take(shown).enumerate() {
        let excerpt: String = parent.text.chars().take(160).collect();
        println!("{}. [{:.4}] {}", i + 1, score, parent.title());
        println!("    số hiệu: {}", parent.metadata.document_number_or_na());
        if let Some(ref status) = parent.metadata.status {
            println!("    tình trạng: {}", status);
        }
        if let Some(ref url) = parent.metadata.source_url {
            println!("    url: {}", url);
        }
        println!("    part: {}/{}", parent.index + 1, parent.total);
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", parent.id);
        println!();
    }

    if shown == 0 {
        println!("No results.");
    }
    Ok(())
}

/// Answer `query` once and print the reply with its sources.
pub async fn run_ask(config: &Config, query: &str, json: bool) -> Result<()> {
    let (service, _) = build_service(config).await?;
    let answer = service.answer(query).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.response);
    if !answer.sources.is_empty() {
        println!();
        println!("Nguồn:");
        for (i, source) in answer.sources.iter().enumerate() {
            println!(
                "  {}. {} (Số hiệu: {})",
                i + 1,
                source.title,
                source.document_number.as_deref().unwrap_or("N/A")
            );
            if let Some(ref url) = source.source_url {
                println!("     {}", url);
            }
        }
    }
    Ok(())
}
