//! Corpus loading.
//!
//! The whole corpus is read eagerly from a [`DocumentStore`]; there is no
//! filtering or paging because the only caller is the offline artifact
//! build. Raw metadata is validated per document, and every document that
//! fails is reported, not just the first.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::artifacts::{BuildStage, DocumentOutcome};
use crate::models::{Document, LegalMetadata};

/// A document exactly as the store holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub id: String,
    pub title: String,
    pub body: String,
    /// Loosely-typed metadata with Vietnamese keys, or `Null`.
    pub metadata: Value,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_all_documents(&self) -> Result<Vec<RawDocument>>;
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("document store unavailable: {0:#}")]
    Store(anyhow::Error),
    #[error("{} document(s) failed metadata validation", failures.len())]
    Invalid { failures: Vec<DocumentOutcome> },
}

pub struct CorpusLoader<S> {
    store: S,
}

impl<S: DocumentStore> CorpusLoader<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Load and validate every document in store order.
    pub async fn load_all(&self) -> Result<Vec<Document>, LoadError> {
        let raw = self
            .store
            .load_all_documents()
            .await
            .map_err(LoadError::Store)?;

        let mut documents = Vec::with_capacity(raw.len());
        let mut failures = Vec::new();

        for doc in raw {
            match LegalMetadata::from_raw(&doc.id, &doc.title, &doc.metadata) {
                Ok(metadata) => documents.push(Document {
                    body: doc.body,
                    metadata,
                }),
                Err(e) => failures.push(DocumentOutcome::Failed {
                    document_id: doc.id,
                    stage: BuildStage::Metadata,
                    message: e.to_string(),
                }),
            }
        }

        if !failures.is_empty() {
            return Err(LoadError::Invalid { failures });
        }
        tracing::debug!(documents = documents.len(), "corpus loaded");
        Ok(documents)
    }
}
