//! The online query path.
//!
//! [`QueryService::answer`] always returns an [`Answer`]. Every failure is
//! turned into one of the fixed fallback replies:
//!
//! | Failure | Reply |
//! |---------|-------|
//! | no rate-limit permit within `max_wait` | [`HIGH_DEMAND`] |
//! | model error or timeout | [`UNAVAILABLE`] |
//! | retrieval error or panic | [`INTERNAL_ERROR`] |
//!
//! Only real answers are cached.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use phaply_core::{
    Answer, AnswerComposer, ComposeError, HybridRetriever, LanguageModel, RetrievalArtifacts,
    Retriever,
};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::llm::create_model;
use crate::rate_limit::RateLimiter;
use crate::rebuild::get_artifacts;
use crate::vector_store::SqliteVectorIndex;

pub const UNAVAILABLE: &str = "Hệ thống tạm thời không khả dụng. Vui lòng thử lại sau.";
pub const HIGH_DEMAND: &str = "Hệ thống đang có lượng truy cập cao. Vui lòng thử lại sau ít phút.";
pub const INTERNAL_ERROR: &str = "Đã xảy ra lỗi nội bộ khi xử lý câu hỏi. Vui lòng thử lại sau.";

pub type DynComposer = AnswerComposer<Arc<dyn Retriever>, Arc<dyn LanguageModel>>;

#[derive(Clone)]
pub struct QueryService {
    composer: Arc<DynComposer>,
    limiter: Arc<RateLimiter>,
    max_wait: Duration,
    cache: Option<Arc<ResponseCache>>,
}

impl QueryService {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn LanguageModel>,
        limiter: Arc<RateLimiter>,
        max_wait: Duration,
    ) -> Self {
        Self {
            composer: Arc::new(AnswerComposer::new(retriever, model)),
            limiter,
            max_wait,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub async fn answer(&self, query: &str) -> Answer {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(query) {
                tracing::debug!("answer served from cache");
                return hit;
            }
        }

        if !self.limiter.acquire(self.max_wait).await {
            tracing::warn!("no rate-limit permit, returning high-demand reply");
            return Answer::text(HIGH_DEMAND);
        }

        let composer = self.composer.clone();
        let owned = query.to_string();
        let outcome = tokio::spawn(async move { composer.answer(&owned).await }).await;

        match outcome {
            Ok(Ok(answer)) => {
                if let Some(cache) = &self.cache {
                    cache.insert(query, answer.clone());
                }
                answer
            }
            Ok(Err(ComposeError::Model(e))) => {
                tracing::warn!(error = %format!("{e:#}"), "language model unavailable");
                Answer::text(UNAVAILABLE)
            }
            Ok(Err(e @ ComposeError::Retrieval(_))) => {
                tracing::error!(error = %e, "retrieval failed");
                Answer::text(INTERNAL_ERROR)
            }
            Err(e) => {
                tracing::error!(error = %e, "query task failed");
                Answer::text(INTERNAL_ERROR)
            }
        }
    }
}

/// Hybrid retriever over the cached artifacts, with the SQLite vector
/// channel when embeddings are enabled. Queries are segmented with the
/// lexicon stored in the artifacts, not the current dictionary file.
pub async fn build_retriever(config: &Config) -> Result<(HybridRetriever, Arc<RetrievalArtifacts>)> {
    let artifacts = get_artifacts(config).await?;
    let mut retriever = HybridRetriever::new(artifacts.clone(), config.retrieval.fusion_params());
    if let Some(embedder) = create_embedder(&config.embedding)? {
        let pool = db::connect(config).await?;
        retriever = retriever.with_vector_index(Arc::new(SqliteVectorIndex::new(pool, embedder)));
    }
    Ok((retriever, artifacts))
}

/// Query service with the configured model, limiter and cache.
pub async fn build_service(config: &Config) -> Result<(QueryService, Arc<RetrievalArtifacts>)> {
    let model = create_model(&config.llm)?;
    let (retriever, artifacts) = build_retriever(config).await?;
    let mut service = QueryService::new(
        Arc::new(retriever),
        model,
        Arc::new(RateLimiter::from_config(&config.rate_limit)),
        Duration::from_millis(config.rate_limit.max_wait_ms),
    );
    if config.cache.enabled {
        service = service.with_cache(Arc::new(ResponseCache::from_config(&config.cache)));
    }
    Ok((service, artifacts))
}
