//! Token counting for chunk budgets.
//!
//! With `[tokenizer] path` set, counts come from a HuggingFace
//! `tokenizer.json`. Truncation and padding configured in that file are
//! switched off, so a count is the full subword length of the text.
//!
//! Without a tokenizer the 4-characters-per-token estimate is used. It is
//! meant for tests and local experiments: Vietnamese text usually produces
//! more subword tokens than the estimate, so chunks can exceed the model's
//! real budget.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use phaply_core::{CharRatioCounter, TokenCounter};
use tokenizers::Tokenizer;

use crate::config::Config;

#[derive(Clone)]
pub struct HfTokenCounter {
    tokenizer: Arc<Tokenizer>,
    fallback: CharRatioCounter,
}

impl HfTokenCounter {
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Load tokenizer {}: {}", path.display(), e))?;
        Self::new(tokenizer)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let tokenizer = Tokenizer::from_bytes(json.as_bytes())
            .map_err(|e| anyhow::anyhow!("Load tokenizer: {}", e))?;
        Self::new(tokenizer)
    }

    fn new(mut tokenizer: Tokenizer) -> Result<Self> {
        tokenizer
            .with_truncation(None)
            .map_err(|e| anyhow::anyhow!("Disable tokenizer truncation: {}", e))?;
        tokenizer.with_padding(None);
        Ok(Self {
            tokenizer: Arc::new(tokenizer),
            fallback: CharRatioCounter::default(),
        })
    }
}

impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.get_ids().len(),
            Err(e) => {
                tracing::warn!(error = %e, "tokenizer failed, estimating from length");
                self.fallback.count(text)
            }
        }
    }
}

/// Counter selected by configuration.
#[derive(Clone)]
pub enum AppCounter {
    Hf(HfTokenCounter),
    Heuristic(CharRatioCounter),
}

impl TokenCounter for AppCounter {
    fn count(&self, text: &str) -> usize {
        match self {
            AppCounter::Hf(c) => c.count(text),
            AppCounter::Heuristic(c) => c.count(text),
        }
    }
}

pub fn build_counter(config: &Config) -> Result<AppCounter> {
    match &config.tokenizer.path {
        Some(path) => Ok(AppCounter::Hf(HfTokenCounter::from_file(path)?)),
        None => {
            tracing::warn!(
                "no [tokenizer] path configured, estimating tokens as chars/4; \
                 chunk budgets are approximate"
            );
            Ok(AppCounter::Heuristic(CharRatioCounter::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaply_core::{ChunkerConfig, IntelligentChunker};

    const WORD_LEVEL: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": {"[UNK]": 0, "hello": 1, "world": 2}, "unk_token": "[UNK]"}
    }"#;

    #[test]
    fn test_hf_counter_counts_tokens() {
        let counter = HfTokenCounter::from_json(WORD_LEVEL).unwrap();
        assert_eq!(counter.count("hello world"), 2);
        assert_eq!(counter.count("hello unknown world"), 3);
        assert_eq!(counter.count(""), 0);
    }

    const TRUNCATING: &str = r#"{
        "version": "1.0",
        "truncation": {"direction": "Right", "max_length": 4, "strategy": "LongestFirst", "stride": 0},
        "padding": {"strategy": {"Fixed": 64}, "direction": "Right", "pad_to_multiple_of": null, "pad_id": 0, "pad_type_id": 0, "pad_token": "[PAD]"},
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": {"[UNK]": 0, "[PAD]": 1, "hello": 2, "world": 3}, "unk_token": "[UNK]"}
    }"#;

    #[test]
    fn test_file_truncation_and_padding_ignored() {
        let counter = HfTokenCounter::from_json(TRUNCATING).unwrap();
        let text = vec!["hello world"; 50].join(" ");
        assert_eq!(counter.count(&text), 100);
        assert_eq!(counter.count("hello"), 1);
    }

    #[test]
    fn test_chunk_budget_with_hf_counter() {
        let counter = HfTokenCounter::from_json(TRUNCATING).unwrap();
        let text = vec!["hello world"; 50].join(" ");
        let chunker = IntelligentChunker::new(
            counter.clone(),
            ChunkerConfig {
                max_tokens: 10,
                overlap_tokens: 2,
            },
        );
        let pieces = chunker.split(&text);
        assert!(pieces.len() >= 10);
        assert!(pieces.iter().all(|p| counter.count(p) <= 10));
    }

    #[test]
    fn test_control_characters_and_stray_marks() {
        let counter = HfTokenCounter::from_json(WORD_LEVEL).unwrap();
        assert!(counter.count("hello\u{0007}world") >= 2);
        assert!(counter.count("\u{0301}") >= 1);
        assert!(counter.count("hello \u{0301}\u{0300} world\u{0000}") >= 2);
    }

    #[test]
    fn test_invalid_tokenizer_json() {
        assert!(HfTokenCounter::from_json("{}").is_err());
    }

    #[test]
    fn test_heuristic_when_unconfigured() {
        let counter = AppCounter::Heuristic(CharRatioCounter::default());
        assert_eq!(counter.count("abcdefgh"), 2);
    }
}
