//! Retrieval artifacts: the parent store, the child chunks, the BM25
//! index over them and the segmenter that produced the index terms, built
//! together from one corpus snapshot.
//!
//! # Build
//!
//! Every document is chunked at parent limits, every parent at child
//! limits, and each child is segmented into words for the lexical index.
//! The build is all-or-nothing: each document yields a [`DocumentOutcome`],
//! and a single failure fails the build so no partial index is ever
//! produced.
//!
//! # Encoding
//!
//! Artifacts are persisted as one binary blob:
//!
//! ```text
//! ┌──────────┬──────────────────┬────────────────────┐
//! │ PHAPLYAR │ schema (u32, LE) │ bincode payload    │
//! └──────────┴──────────────────┴────────────────────┘
//! ```
//!
//! A blob with a different magic or schema version is rejected with
//! [`ArtifactError::Incompatible`] instead of being misread.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bm25::{Bm25Index, Bm25Params};
use crate::chunk::{ChunkError, ChunkerConfig, IntelligentChunker};
use crate::loader::{CorpusLoader, DocumentStore, LoadError};
use crate::models::{ChildChunk, Document, ParentChunk};
use crate::segment::Segmenter;
use crate::token::TokenCounter;

pub const MAGIC: &[u8; 8] = b"PHAPLYAR";
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("incompatible artifact file: {0}")]
    Incompatible(String),
    #[error("artifact payload could not be encoded or decoded: {0}")]
    Codec(#[from] bincode::Error),
}

/// Where in the pipeline a document failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Metadata,
    Chunking,
    Indexing,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStage::Metadata => "metadata",
            BuildStage::Chunking => "chunking",
            BuildStage::Indexing => "indexing",
        })
    }
}

/// Result of processing one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Indexed {
        document_id: String,
        parents: usize,
        children: usize,
    },
    Failed {
        document_id: String,
        stage: BuildStage,
        message: String,
    },
}

impl DocumentOutcome {
    pub fn document_id(&self) -> &str {
        match self {
            DocumentOutcome::Indexed { document_id, .. } => document_id,
            DocumentOutcome::Failed { document_id, .. } => document_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DocumentOutcome::Failed { .. })
    }
}

impl fmt::Display for DocumentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentOutcome::Indexed {
                document_id,
                parents,
                children,
            } => write!(f, "{document_id}: {parents} parent(s), {children} child(ren)"),
            DocumentOutcome::Failed {
                document_id,
                stage,
                message,
            } => write!(f, "{document_id}: failed at {stage}: {message}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid chunking configuration: {0}")]
    Config(#[from] ChunkError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("{} document(s) failed to index", failures.len())]
    Documents { failures: Vec<DocumentOutcome> },
}

impl BuildError {
    /// Per-document failures, empty for errors not tied to a document.
    pub fn failures(&self) -> &[DocumentOutcome] {
        match self {
            BuildError::Documents { failures } => failures,
            BuildError::Load(LoadError::Invalid { failures }) => failures,
            _ => &[],
        }
    }
}

/// Summary of a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub outcomes: Vec<DocumentOutcome>,
    pub parents: usize,
    pub children: usize,
    pub built_at: i64,
}

impl BuildReport {
    pub fn documents(&self) -> usize {
        self.outcomes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalArtifacts {
    /// Unix seconds.
    pub built_at: i64,
    parents: BTreeMap<String, ParentChunk>,
    children: Vec<ChildChunk>,
    lexical: Bm25Index,
    segmenter: Segmenter,
}

impl RetrievalArtifacts {
    pub fn parent(&self, id: &str) -> Option<&ParentChunk> {
        self.parents.get(id)
    }

    pub fn parents(&self) -> &BTreeMap<String, ParentChunk> {
        &self.parents
    }

    /// Children in index order: position `i` is document `i` of [`Self::lexical`].
    pub fn children(&self) -> &[ChildChunk] {
        &self.children
    }

    pub fn lexical(&self) -> &Bm25Index {
        &self.lexical
    }

    /// Segmenter the children were tokenized with; queries must use it too.
    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    /// Child ids whose `parent_id` is missing from the parent store.
    pub fn dangling_children(&self) -> Vec<&str> {
        self.children
            .iter()
            .filter(|c| !self.parents.contains_key(&c.parent_id))
            .map(|c| c.id.as_str())
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ArtifactError> {
        let payload = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(MAGIC.len() + 4 + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let header = MAGIC.len() + 4;
        if bytes.len() < header || &bytes[..MAGIC.len()] != MAGIC {
            return Err(ArtifactError::Incompatible("not a phaply artifact file".into()));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[MAGIC.len()..header]);
        let version = u32::from_le_bytes(version);
        if version != SCHEMA_VERSION {
            return Err(ArtifactError::Incompatible(format!(
                "schema version {version}, expected {SCHEMA_VERSION}; run `phaply rebuild`"
            )));
        }
        Ok(bincode::deserialize(&bytes[header..])?)
    }
}

pub struct ArtifactBuilder<C> {
    parents: IntelligentChunker<C>,
    children: IntelligentChunker<C>,
    segmenter: Segmenter,
    bm25: Bm25Params,
}

impl<C: TokenCounter + Clone> ArtifactBuilder<C> {
    pub fn new(counter: C, parent: ChunkerConfig, child: ChunkerConfig) -> Result<Self, BuildError> {
        parent.validate()?;
        child.validate()?;
        Ok(Self {
            parents: IntelligentChunker::new(counter.clone(), parent),
            children: IntelligentChunker::new(counter, child),
            segmenter: Segmenter::new(),
            bm25: Bm25Params::default(),
        })
    }

    pub fn with_segmenter(mut self, segmenter: Segmenter) -> Self {
        self.segmenter = segmenter;
        self
    }

    /// Load the corpus and build from it.
    pub async fn build_from_store<S: DocumentStore>(
        &self,
        loader: &CorpusLoader<S>,
    ) -> Result<(RetrievalArtifacts, BuildReport), BuildError> {
        let documents = loader.load_all().await?;
        self.build(&documents)
    }

    pub fn build(&self, documents: &[Document]) -> Result<(RetrievalArtifacts, BuildReport), BuildError> {
        let mut parents = BTreeMap::new();
        let mut children = Vec::new();
        let mut outcomes = Vec::with_capacity(documents.len());
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for doc in documents {
            if !seen_ids.insert(doc.id()) {
                outcomes.push(DocumentOutcome::Failed {
                    document_id: doc.id().to_string(),
                    stage: BuildStage::Indexing,
                    message: "duplicate document id".to_string(),
                });
                continue;
            }
            let outcome = self.build_document(doc, &mut parents, &mut children);
            tracing::debug!(%outcome, "document processed");
            outcomes.push(outcome);
        }

        let failures: Vec<DocumentOutcome> = outcomes.iter().filter(|o| o.is_failed()).cloned().collect();
        if !failures.is_empty() {
            return Err(BuildError::Documents { failures });
        }
        if documents.is_empty() {
            tracing::warn!("building artifacts from an empty corpus");
        }

        let tokens: Vec<Vec<String>> = children.iter().map(|c: &ChildChunk| c.tokens.clone()).collect();
        let lexical = Bm25Index::build(&tokens, self.bm25);
        let built_at = chrono::Utc::now().timestamp();

        tracing::info!(
            documents = documents.len(),
            parents = parents.len(),
            children = children.len(),
            "retrieval artifacts built"
        );

        let report = BuildReport {
            outcomes,
            parents: parents.len(),
            children: children.len(),
            built_at,
        };
        Ok((
            RetrievalArtifacts {
                built_at,
                parents,
                children,
                lexical,
                segmenter: self.segmenter.clone(),
            },
            report,
        ))
    }

    /// Chunk one document into the shared stores. Nothing is inserted when
    /// the document fails.
    fn build_document(
        &self,
        doc: &Document,
        parents: &mut BTreeMap<String, ParentChunk>,
        children: &mut Vec<ChildChunk>,
    ) -> DocumentOutcome {
        let fail = |stage, message: String| DocumentOutcome::Failed {
            document_id: doc.id().to_string(),
            stage,
            message,
        };

        let mut doc_parents = Vec::new();
        let mut doc_children = Vec::new();

        for chunk in self.parents.chunk(&doc.body, &doc.metadata) {
            let parent_id = ParentChunk::make_id(doc.id(), chunk.index);
            if parents.contains_key(&parent_id) {
                return fail(BuildStage::Indexing, format!("parent id {parent_id} already exists"));
            }

            let texts = self.children.split(&chunk.text);
            if texts.is_empty() {
                return fail(
                    BuildStage::Chunking,
                    format!("parent {parent_id} produced no child chunks"),
                );
            }
            let total = texts.len();
            for (index, text) in texts.into_iter().enumerate() {
                doc_children.push(ChildChunk {
                    id: format!("{parent_id}-{index}"),
                    parent_id: parent_id.clone(),
                    index,
                    total,
                    tokens: self.segmenter.segment(&text),
                    text,
                    document_id: doc.id().to_string(),
                    title: doc.title().to_string(),
                    document_number: doc.metadata.document_number.clone(),
                });
            }

            doc_parents.push(ParentChunk {
                id: parent_id,
                index: chunk.index,
                total: chunk.total,
                text: chunk.text,
                metadata: chunk.metadata,
            });
        }

        let outcome = DocumentOutcome::Indexed {
            document_id: doc.id().to_string(),
            parents: doc_parents.len(),
            children: doc_children.len(),
        };
        for p in doc_parents {
            parents.insert(p.id.clone(), p);
        }
        children.extend(doc_children);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LegalMetadata;
    use crate::token::CharRatioCounter;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::loader::RawDocument;

    #[derive(Clone)]
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn doc(id: &str, title: &str, body: &str) -> Document {
        let metadata = LegalMetadata::from_raw(id, title, &json!({ "so_hieu": format!("{id}/2024") })).unwrap();
        Document {
            body: body.to_string(),
            metadata,
        }
    }

    fn paragraphs(n: usize, words: usize, prefix: &str) -> String {
        (0..n)
            .map(|p| {
                (0..words)
                    .map(|w| format!("{prefix}{p}w{w}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn small_builder() -> ArtifactBuilder<WordCounter> {
        ArtifactBuilder::new(
            WordCounter,
            ChunkerConfig {
                max_tokens: 50,
                overlap_tokens: 10,
            },
            ChunkerConfig {
                max_tokens: 20,
                overlap_tokens: 5,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = ArtifactBuilder::new(
            CharRatioCounter::default(),
            ChunkerConfig {
                max_tokens: 10,
                overlap_tokens: 10,
            },
            ChunkerConfig::CHILD,
        )
        .err()
        .unwrap();
        assert!(matches!(err, BuildError::Config(ChunkError::OverlapTooLarge { .. })));
    }

    #[test]
    fn test_parent_child_integrity() {
        let docs = vec![
            doc("luat-a", "Luật A", &paragraphs(8, 15, "a")),
            doc("luat-b", "Luật B", &paragraphs(3, 30, "b")),
        ];
        let (artifacts, report) = small_builder().build(&docs).unwrap();

        assert!(artifacts.parents().len() > 2);
        assert!(artifacts.dangling_children().is_empty());
        assert_eq!(artifacts.lexical().len(), artifacts.children().len());
        assert_eq!(report.parents, artifacts.parents().len());
        assert_eq!(report.children, artifacts.children().len());
        assert_eq!(report.documents(), 2);

        for p in artifacts.parents().values() {
            assert!(WordCounter.count(&p.text) <= 50);
            assert_eq!(p.id, ParentChunk::make_id(&p.metadata.document_id, p.index));
        }
        for c in artifacts.children() {
            assert!(WordCounter.count(&c.text) <= 20);
            assert!(c.id.starts_with(&c.parent_id));
            let parent = artifacts.parent(&c.parent_id).unwrap();
            assert_eq!(parent.title(), c.title);
            assert!(parent.text.contains(c.text.split_whitespace().next().unwrap()));
        }
    }

    #[test]
    fn test_children_carry_document_fields_and_tokens() {
        let docs = vec![doc("nd-15", "Nghị định 15", "Người lao động được nghỉ phép.")];
        let (artifacts, _) = small_builder().build(&docs).unwrap();
        let child = &artifacts.children()[0];
        assert_eq!(child.id, "nd-15-0-0");
        assert_eq!(child.parent_id, "nd-15-0");
        assert_eq!(child.document_number.as_deref(), Some("nd-15/2024"));
        assert_eq!(child.tokens[0], "người_lao_động");
    }

    #[test]
    fn test_empty_body_indexes_nothing() {
        let docs = vec![doc("empty", "Trống", "   \n\n  ")];
        let (artifacts, report) = small_builder().build(&docs).unwrap();
        assert!(artifacts.parents().is_empty());
        assert_eq!(
            report.outcomes[0],
            DocumentOutcome::Indexed {
                document_id: "empty".into(),
                parents: 0,
                children: 0
            }
        );
    }

    #[test]
    fn test_duplicate_document_fails_build() {
        let docs = vec![doc("x", "X", "một"), doc("x", "X again", "hai")];
        let err = small_builder().build(&docs).unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            DocumentOutcome::Failed { stage: BuildStage::Indexing, .. }
        ));
    }

    #[test]
    fn test_rebuild_produces_identical_parent_keys() {
        let docs = vec![
            doc("a", "A", &paragraphs(6, 12, "a")),
            doc("b", "B", &paragraphs(2, 5, "b")),
        ];
        let builder = small_builder();
        let (first, _) = builder.build(&docs).unwrap();
        let (second, _) = builder.build(&docs).unwrap();
        let k1: Vec<&String> = first.parents().keys().collect();
        let k2: Vec<&String> = second.parents().keys().collect();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_encode_decode() {
        let docs = vec![doc("a", "A", &paragraphs(4, 12, "a"))];
        let (artifacts, _) = small_builder().build(&docs).unwrap();
        let bytes = artifacts.encode().unwrap();
        assert_eq!(&bytes[..8], MAGIC);
        let decoded = RetrievalArtifacts::decode(&bytes).unwrap();
        assert_eq!(decoded, artifacts);
    }

    #[test]
    fn test_decode_rejects_other_schema_and_garbage() {
        let docs = vec![doc("a", "A", "x")];
        let (artifacts, _) = small_builder().build(&docs).unwrap();
        let mut bytes = artifacts.encode().unwrap();
        bytes[8..12].copy_from_slice(&(SCHEMA_VERSION + 1).to_le_bytes());
        assert!(matches!(
            RetrievalArtifacts::decode(&bytes),
            Err(ArtifactError::Incompatible(_))
        ));
        assert!(matches!(
            RetrievalArtifacts::decode(b"pickle"),
            Err(ArtifactError::Incompatible(_))
        ));
    }

    #[test]
    fn test_segmenter_travels_with_artifacts() {
        let custom = Segmenter::new().with_dictionary("đơn phương");
        let docs = vec![doc("bllđ", "BLLĐ", "Quyền đơn phương chấm dứt hợp đồng.")];
        let (artifacts, _) = small_builder().with_segmenter(custom.clone()).build(&docs).unwrap();
        assert_eq!(artifacts.segmenter(), &custom);
        assert!(artifacts.children()[0].tokens.contains(&"đơn_phương".to_string()));

        let decoded = RetrievalArtifacts::decode(&artifacts.encode().unwrap()).unwrap();
        assert_eq!(decoded.segmenter().segment("đơn phương"), vec!["đơn_phương"]);
    }

    struct FixedStore(Vec<RawDocument>);

    #[async_trait]
    impl DocumentStore for FixedStore {
        async fn load_all_documents(&self) -> anyhow::Result<Vec<RawDocument>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_build_from_store_surfaces_metadata_failures() {
        let loader = CorpusLoader::new(FixedStore(vec![RawDocument {
            id: "bad".into(),
            title: "Bad".into(),
            body: "x".into(),
            metadata: Value::String("oops".into()),
        }]));
        let err = small_builder().build_from_store(&loader).await.unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].document_id(), "bad");
    }
}
