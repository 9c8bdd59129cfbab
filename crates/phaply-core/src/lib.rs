//! # Phaply Core
//!
//! Runtime-agnostic logic for the Phaply legal question-answering engine:
//! document models, token counting, parent/child chunking, Vietnamese word
//! segmentation, the BM25 lexical index, hybrid retrieval and answer
//! composition.
//!
//! This crate contains no tokio, sqlx, filesystem access or network
//! clients. Collaborators that need those (document store, vector index,
//! language model, subword tokenizer) are traits implemented by the
//! `phaply` application crate.
//!
//! ```text
//! DocumentStore ─▶ CorpusLoader ─▶ ArtifactBuilder ─▶ RetrievalArtifacts
//!                                                          │
//!                          VectorIndex ──┐                 ▼
//!                                        ├─▶ HybridRetriever ─▶ AnswerComposer ─▶ Answer
//!                         LanguageModel ─┘
//! ```

pub mod artifacts;
pub mod bm25;
pub mod chunk;
pub mod compose;
pub mod fusion;
pub mod loader;
pub mod models;
pub mod retriever;
pub mod segment;
pub mod token;
pub mod vector;

pub use artifacts::{
    ArtifactBuilder, ArtifactError, BuildError, BuildReport, BuildStage, DocumentOutcome, RetrievalArtifacts,
};
pub use bm25::{Bm25Index, Bm25Params};
pub use chunk::{Chunk, ChunkError, ChunkerConfig, IntelligentChunker};
pub use compose::{Answer, AnswerComposer, ComposeError, LanguageModel, SourceCitation, NOT_FOUND};
pub use fusion::FusionParams;
pub use loader::{CorpusLoader, DocumentStore, LoadError, RawDocument};
pub use models::{ChildChunk, Document, LegalMetadata, ParentChunk, RelatedDocument};
pub use retriever::{HybridRetriever, RetrievalError, Retriever};
pub use segment::Segmenter;
pub use token::{CharRatioCounter, TokenCounter};
pub use vector::{MemoryVectorIndex, VectorHit, VectorIndex};
