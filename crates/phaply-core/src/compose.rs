//! Answer composition: prompt construction, the model call and citation
//! parsing.
//!
//! The model is instructed to end its reply with a
//! `SOURCES_USED: ["title", ...]` line. Everything before that line is the
//! answer; the listed titles are matched back against the parents that were
//! actually in the prompt, so a title the model invents is never cited.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ParentChunk;
use crate::retriever::{RetrievalError, Retriever};

/// Fixed reply when the context does not contain the answer.
pub const NOT_FOUND: &str = "Tôi không tìm thấy thông tin này trong các tài liệu được cung cấp.";

/// Characters of parent text kept in a citation preview.
pub const PREVIEW_CHARS: usize = 200;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        (**self).generate(prompt).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub title: String,
    pub document_number: Option<String>,
    pub source_url: Option<String>,
    pub page_content_preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub response: String,
    pub sources: Vec<SourceCitation>,
}

impl Answer {
    /// An answer with no citations.
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error("language model call failed: {0:#}")]
    Model(anyhow::Error),
}

/// Retrieved parents plus the prompt built from them.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub parents: Vec<ParentChunk>,
    pub text: String,
}

pub struct AnswerComposer<R, L> {
    retriever: R,
    model: L,
}

impl<R: Retriever, L: LanguageModel> AnswerComposer<R, L> {
    pub fn new(retriever: R, model: L) -> Self {
        Self { retriever, model }
    }

    pub fn retriever(&self) -> &R {
        &self.retriever
    }

    /// Retrieve context for `query` and render the prompt.
    pub async fn prepare(&self, query: &str) -> Result<PreparedPrompt, ComposeError> {
        let parents = self.retriever.retrieve(query).await?;
        let text = build_prompt(&format_context(&parents), query);
        Ok(PreparedPrompt { parents, text })
    }

    /// Answer `query` from retrieved context.
    ///
    /// The model is called even when nothing was retrieved, so it can give
    /// the not-found reply itself.
    pub async fn answer(&self, query: &str) -> Result<Answer, ComposeError> {
        let prepared = self.prepare(query).await?;
        tracing::debug!(parents = prepared.parents.len(), "calling language model");
        let raw = self
            .model
            .generate(&prepared.text)
            .await
            .map_err(ComposeError::Model)?;
        Ok(parse_response(&raw, &prepared.parents))
    }
}

/// Render parents as labelled source blocks separated by blank lines.
pub fn format_context(parents: &[ParentChunk]) -> String {
    parents
        .iter()
        .map(|p| {
            format!(
                "--- Source: {} (Số hiệu: {}) ---\n{}\n--- End Source ---",
                p.title(),
                p.metadata.document_number_or_na(),
                p.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Bạn là trợ lý pháp lý chuyên về pháp luật Việt Nam. \
Hãy trả lời câu hỏi CHỈ dựa trên các tài liệu trong phần NGỮ CẢNH bên dưới.

Yêu cầu:
- Trả lời bằng tiếng Việt.
- Trình bày rõ ràng: dùng gạch đầu dòng, **in đậm** các ý chính và *in nghiêng* khi trích dẫn điều khoản.
- Không suy đoán và không dùng kiến thức ngoài ngữ cảnh.
- Nếu ngữ cảnh không đủ để trả lời, chỉ trả lời đúng câu: \"{NOT_FOUND}\"
- Dòng cuối cùng liệt kê tiêu đề các tài liệu bạn THỰC SỰ đã dùng, đúng định dạng:
SOURCES_USED: [\"Tiêu đề 1\", \"Tiêu đề 2\"]
Nếu không dùng tài liệu nào, ghi: SOURCES_USED: []

NGỮ CẢNH:
{context}

CÂU HỎI: {question}

TRẢ LỜI:"
    )
}

fn sources_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)SOURCES_USED:\s*(\[.*?\])").expect("valid regex"))
}

/// Split a raw model reply into answer text and citations.
///
/// A missing or unparseable `SOURCES_USED` array leaves the whole reply,
/// byte for byte, as the answer with no citations.
pub fn parse_response(raw: &str, parents: &[ParentChunk]) -> Answer {
    let Some(caps) = sources_re().captures(raw) else {
        tracing::debug!("model reply has no SOURCES_USED line");
        return non_empty(Answer::text(raw));
    };
    let (Some(whole), Some(array)) = (caps.get(0), caps.get(1)) else {
        return non_empty(Answer::text(raw));
    };

    let titles: Vec<serde_json::Value> = match serde_json::from_str(array.as_str()) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "malformed SOURCES_USED array");
            return non_empty(Answer::text(raw));
        }
    };

    let mut sources: Vec<SourceCitation> = Vec::new();
    for title in titles.iter().filter_map(|t| t.as_str()) {
        let Some(parent) = match_parent(title, parents) else {
            tracing::debug!(title, "cited title not in context, dropped");
            continue;
        };
        if sources.iter().any(|s| s.title == parent.title()) {
            continue;
        }
        sources.push(citation(parent));
    }

    non_empty(Answer {
        response: raw[..whole.start()].trim().to_string(),
        sources,
    })
}

fn non_empty(mut answer: Answer) -> Answer {
    if answer.response.trim().is_empty() {
        answer.response = NOT_FOUND.to_string();
    }
    answer
}

fn match_parent<'a>(title: &str, parents: &'a [ParentChunk]) -> Option<&'a ParentChunk> {
    if let Some(p) = parents.iter().find(|p| p.title() == title) {
        return Some(p);
    }
    let wanted = normalize_title(title);
    parents.iter().find(|p| normalize_title(p.title()) == wanted)
}

fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn citation(parent: &ParentChunk) -> SourceCitation {
    let preview: String = parent.text.chars().take(PREVIEW_CHARS).collect();
    SourceCitation {
        title: parent.title().to_string(),
        document_number: parent.metadata.document_number.clone(),
        source_url: parent.metadata.source_url.clone(),
        page_content_preview: format!("{preview}..."),
    }
}
