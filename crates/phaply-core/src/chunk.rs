//! Token-bounded paragraph chunker.
//!
//! Splits document text into [`Chunk`]s whose token count (as measured by a
//! [`TokenCounter`]) never exceeds `max_tokens`, unless a single word is
//! itself larger than the budget. The same chunker runs twice per document:
//! once with parent limits, then once per parent with child limits.
//!
//! # Algorithm
//!
//! 1. Split on blank-line paragraph boundaries.
//! 2. Accumulate paragraphs while the joined buffer fits `max_tokens`.
//! 3. On overflow, flush the buffer. The next buffer is seeded with the
//!    flushed buffer's last paragraph when that paragraph is at most
//!    `overlap_tokens` long and still fits alongside the incoming paragraph.
//! 4. A paragraph larger than `max_tokens` flushes the pending buffer and is
//!    split on its own: greedily by sentence (`.`, `!`, `?` followed by
//!    whitespace), or by word when it has a single sentence. No overlap is
//!    carried into, within, or out of this split.
//! 5. Flush whatever remains, then tag each chunk with its index, the total
//!    count and a copy of the caller's metadata.
//!
//! ```rust
//! use phaply_core::chunk::{ChunkerConfig, IntelligentChunker};
//! use phaply_core::token::CharRatioCounter;
//!
//! let chunker = IntelligentChunker::new(CharRatioCounter::default(), ChunkerConfig::PARENT);
//! let chunks = chunker.chunk("Điều 1. Phạm vi.\n\nĐiều 2. Đối tượng.", &"doc-1");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].total, 1);
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::TokenCounter;

const PARAGRAPH_SEP: &str = "\n\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("max_tokens must be > 0")]
    ZeroBudget,
    #[error("overlap_tokens ({overlap}) must be smaller than max_tokens ({max})")]
    OverlapTooLarge { overlap: usize, max: usize },
}

/// Token limits for one chunking tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl ChunkerConfig {
    pub const PARENT: ChunkerConfig = ChunkerConfig {
        max_tokens: 3500,
        overlap_tokens: 200,
    };

    pub const CHILD: ChunkerConfig = ChunkerConfig {
        max_tokens: 800,
        overlap_tokens: 100,
    };

    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.max_tokens == 0 {
            return Err(ChunkError::ZeroBudget);
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ChunkError::OverlapTooLarge {
                overlap: self.overlap_tokens,
                max: self.max_tokens,
            });
        }
        Ok(())
    }
}

/// A slice of a larger text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<M> {
    /// 0-based position among siblings.
    pub index: usize,
    /// Number of siblings produced from the same input.
    pub total: usize,
    pub text: String,
    pub metadata: M,
}

pub struct IntelligentChunker<C> {
    counter: C,
    config: ChunkerConfig,
}

impl<C: TokenCounter> IntelligentChunker<C> {
    pub fn new(counter: C, config: ChunkerConfig) -> Self {
        Self { counter, config }
    }

    /// Chunk `text`, tagging every piece with `metadata`.
    ///
    /// Empty or whitespace-only text produces no chunks.
    pub fn chunk<M: Clone>(&self, text: &str, metadata: &M) -> Vec<Chunk<M>> {
        let pieces = self.split(text);
        let total = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                index,
                total,
                text,
                metadata: metadata.clone(),
            })
            .collect()
    }

    /// Split `text` into untagged chunk texts.
    pub fn split(&self, text: &str) -> Vec<String> {
        let max = self.config.max_tokens;
        let mut out = Vec::new();
        let mut buf: Vec<&str> = Vec::new();

        for para in split_paragraphs(text) {
            if self.counter.count(para) > max {
                if !buf.is_empty() {
                    out.push(buf.join(PARAGRAPH_SEP));
                    buf.clear();
                }
                self.split_oversized(para, &mut out);
                continue;
            }

            if buf.is_empty() || self.fits(&buf, para) {
                buf.push(para);
                continue;
            }

            let last = buf[buf.len() - 1];
            out.push(buf.join(PARAGRAPH_SEP));
            buf.clear();

            if self.counter.count(last) <= self.config.overlap_tokens && self.fits(&[last], para) {
                buf.push(last);
            }
            buf.push(para);
        }

        if !buf.is_empty() {
            out.push(buf.join(PARAGRAPH_SEP));
        }

        out
    }

    fn fits(&self, buf: &[&str], next: &str) -> bool {
        let mut candidate = buf.join(PARAGRAPH_SEP);
        candidate.push_str(PARAGRAPH_SEP);
        candidate.push_str(next);
        self.counter.count(&candidate) <= self.config.max_tokens
    }

    fn split_oversized(&self, para: &str, out: &mut Vec<String>) {
        let sentences = split_sentences(para);
        if sentences.len() <= 1 {
            self.pack_words(para, out);
            return;
        }

        let max = self.config.max_tokens;
        let mut buf = String::new();
        for sentence in sentences {
            if self.counter.count(sentence) > max {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
                self.pack_words(sentence, out);
                continue;
            }
            if buf.is_empty() {
                buf.push_str(sentence);
                continue;
            }
            let candidate = format!("{} {}", buf, sentence);
            if self.counter.count(&candidate) <= max {
                buf = candidate;
            } else {
                out.push(std::mem::replace(&mut buf, sentence.to_string()));
            }
        }
        if !buf.is_empty() {
            out.push(buf);
        }
    }

    /// Greedy word packing. A word is never split, so a single word above
    /// the budget becomes a chunk of its own.
    fn pack_words(&self, text: &str, out: &mut Vec<String>) {
        let max = self.config.max_tokens;
        let mut buf = String::new();
        for word in text.split_whitespace() {
            if buf.is_empty() {
                buf.push_str(word);
                continue;
            }
            let candidate = format!("{} {}", buf, word);
            if self.counter.count(&candidate) <= max {
                buf = candidate;
            } else {
                out.push(std::mem::replace(&mut buf, word.to_string()));
            }
        }
        if !buf.is_empty() {
            out.push(buf);
        }
    }
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*(?:\r?\n[ \t]*)+").expect("valid paragraph regex"))
}

fn sentence_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("valid sentence regex"))
}

/// Blank-line separated paragraphs, trimmed, empties dropped.
fn split_paragraphs(text: &str) -> Vec<&str> {
    // A `\r` left before the separator is removed by the trim below.
    paragraph_re()
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Sentences ending in `.`, `!` or `?` followed by whitespace. The
/// terminator stays with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in sentence_end_re().find_iter(text) {
        let end = m.start() + 1;
        let s = text[start..end].trim();
        if !s.is_empty() {
            sentences.push(s);
        }
        start = m.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}
