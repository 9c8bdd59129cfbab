//! Query-path fallbacks, caching and the HTTP API, with in-process mocks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phaply::cache::ResponseCache;
use phaply::llm::TimeoutModel;
use phaply::query::{QueryService, HIGH_DEMAND, INTERNAL_ERROR, UNAVAILABLE};
use phaply::rate_limit::RateLimiter;
use phaply::server::{router, AppState};
use phaply_core::{
    ArtifactBuilder, ChunkerConfig, Document, FusionParams, HybridRetriever, LanguageModel,
    LegalMetadata, ParentChunk, RetrievalArtifacts, RetrievalError, Retriever, TokenCounter,
    NOT_FOUND,
};
use serde_json::{json, Value};

#[derive(Clone)]
struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

fn artifacts() -> Arc<RetrievalArtifacts> {
    let doc = |id: &str, title: &str, number: &str, body: &str| Document {
        body: body.to_string(),
        metadata: LegalMetadata::from_raw(id, title, &json!({ "so_hieu": number })).unwrap(),
    };
    let docs = vec![
        doc(
            "bllđ-2019",
            "Bộ luật Lao động 2019",
            "45/2019/QH14",
            "Thời gian thử việc không quá 180 ngày đối với người quản lý doanh nghiệp.",
        ),
        doc(
            "nd-100-2019",
            "Nghị định 100/2019/NĐ-CP",
            "100/2019/NĐ-CP",
            "Xử phạt người điều khiển xe mô tô vi phạm nồng độ cồn.",
        ),
    ];
    let builder = ArtifactBuilder::new(
        WordCounter,
        ChunkerConfig {
            max_tokens: 40,
            overlap_tokens: 5,
        },
        ChunkerConfig {
            max_tokens: 20,
            overlap_tokens: 2,
        },
    )
    .unwrap();
    Arc::new(builder.build(&docs).unwrap().0)
}

fn retriever() -> Arc<dyn Retriever> {
    Arc::new(HybridRetriever::new(artifacts(), FusionParams::default()))
}

/// Replies with a fixed text and counts calls.
struct CountingModel {
    reply: String,
    calls: AtomicUsize,
}

impl CountingModel {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for CountingModel {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("API error 503 Service Unavailable")
    }
}

struct HangingModel;

#[async_trait]
impl LanguageModel for HangingModel {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("quá muộn".to_string())
    }
}

struct CorruptRetriever;

#[async_trait]
impl Retriever for CorruptRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<ParentChunk>, RetrievalError> {
        Err(RetrievalError::CorruptIndex {
            position: 7,
            children: 2,
        })
    }
}

struct PanickingRetriever;

#[async_trait]
impl Retriever for PanickingRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<ParentChunk>, RetrievalError> {
        panic!("index exploded")
    }
}

fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(6000, 100))
}

const CITED: &str = "Thời gian thử việc tối đa là **180 ngày**.\n\nSOURCES_USED: [\"Bộ luật Lao động 2019\"]";

#[tokio::test]
async fn test_answer_with_citation() {
    let model = CountingModel::new(CITED);
    let service = QueryService::new(retriever(), model.clone(), limiter(), Duration::ZERO);

    let answer = service.answer("thời gian thử việc").await;
    assert_eq!(answer.response, "Thời gian thử việc tối đa là **180 ngày**.");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].title, "Bộ luật Lao động 2019");
    assert_eq!(answer.sources[0].document_number.as_deref(), Some("45/2019/QH14"));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_cache_serves_repeated_question() {
    let model = CountingModel::new(CITED);
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60), 10));
    let service = QueryService::new(retriever(), model.clone(), limiter(), Duration::ZERO)
        .with_cache(cache.clone());

    let first = service.answer("Thời gian thử việc").await;
    let second = service.answer("  thời gian   THỬ VIỆC ").await;
    assert_eq!(first, second);
    assert_eq!(model.calls(), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_model_error_is_unavailable_and_not_cached() {
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60), 10));
    let service = QueryService::new(retriever(), Arc::new(FailingModel), limiter(), Duration::ZERO)
        .with_cache(cache.clone());

    let answer = service.answer("nồng độ cồn").await;
    assert_eq!(answer.response, UNAVAILABLE);
    assert!(answer.sources.is_empty());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_model_timeout_is_unavailable() {
    let model = Arc::new(TimeoutModel::new(HangingModel, Duration::from_millis(50)));
    let service = QueryService::new(retriever(), model, limiter(), Duration::ZERO);

    let answer = tokio::time::timeout(Duration::from_secs(5), service.answer("nồng độ cồn"))
        .await
        .expect("query path must not hang");
    assert_eq!(answer.response, UNAVAILABLE);
}

#[tokio::test]
async fn test_rate_limit_denial_is_high_demand() {
    let model = CountingModel::new(CITED);
    let service = QueryService::new(
        retriever(),
        model.clone(),
        Arc::new(RateLimiter::new(1, 1)),
        Duration::from_millis(20),
    );

    assert_eq!(service.answer("câu hỏi một").await.response, "Thời gian thử việc tối đa là **180 ngày**.");
    assert_eq!(service.answer("câu hỏi hai").await.response, HIGH_DEMAND);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_retrieval_error_is_internal_error() {
    let model = CountingModel::new(CITED);
    let service = QueryService::new(Arc::new(CorruptRetriever), model.clone(), limiter(), Duration::ZERO);

    assert_eq!(service.answer("bất kỳ").await.response, INTERNAL_ERROR);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_retriever_panic_does_not_escape() {
    let service = QueryService::new(
        Arc::new(PanickingRetriever),
        CountingModel::new(CITED),
        limiter(),
        Duration::ZERO,
    );
    assert_eq!(service.answer("bất kỳ").await.response, INTERNAL_ERROR);
    // The service is still usable afterwards.
    assert_eq!(service.answer("lần nữa").await.response, INTERNAL_ERROR);
}

#[tokio::test]
async fn test_nothing_retrieved_still_asks_model() {
    let model = CountingModel::new(NOT_FOUND);
    let service = QueryService::new(retriever(), model.clone(), limiter(), Duration::ZERO);

    let answer = service.answer("blockchain").await;
    assert_eq!(answer.response, NOT_FOUND);
    assert!(answer.sources.is_empty());
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_queries() {
    let model = CountingModel::new(CITED);
    let service = QueryService::new(retriever(), model.clone(), limiter(), Duration::ZERO);

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.answer(&format!("thời gian thử việc {i}")).await
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().sources.len(), 1);
    }
    assert_eq!(model.calls(), 8);
}

async fn spawn_server(service: QueryService) -> String {
    let app = router(AppState {
        service,
        artifacts: artifacts(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_answer_and_health() {
    let service = QueryService::new(retriever(), CountingModel::new(CITED), limiter(), Duration::ZERO);
    let base = spawn_server(service).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/answer"))
        .json(&json!({"query": "thời gian thử việc"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["sources"][0]["title"], "Bộ luật Lao động 2019");
    assert!(body["sources"][0]["page_content_preview"]
        .as_str()
        .unwrap()
        .ends_with("..."));

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["parents"], 2);
}

#[tokio::test]
async fn test_http_rejects_empty_query() {
    let service = QueryService::new(retriever(), CountingModel::new(CITED), limiter(), Duration::ZERO);
    let base = spawn_server(service).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/answer"))
        .json(&json!({"query": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{base}/answer"))
        .header("content-type", "application/json")
        .body("{\"question\": 1}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
