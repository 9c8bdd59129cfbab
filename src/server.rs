//! HTTP query API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/answer` | Answer `{ "query": "..." }` with cited sources |
//! | `GET`  | `/health` | Status, version and artifact counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Model and retrieval failures are not HTTP errors: `/answer` returns the
//! fixed fallback reply with status 200.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use phaply_core::{Answer, RetrievalArtifacts};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::query::{build_service, QueryService};

#[derive(Clone)]
pub struct AppState {
    pub service: QueryService,
    pub artifacts: Arc<RetrievalArtifacts>,
}

/// `phaply serve`: load artifacts, start the cache sweeper and serve
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let (service, artifacts) = build_service(config).await?;

    let sweeper = service.cache().map(|cache| {
        ResponseCache::spawn_sweeper(
            cache.clone(),
            Duration::from_secs(config.cache.sweep_interval_secs.max(1)),
        )
    });

    let app = router(AppState { service, artifacts });
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("phaply listening on http://{}", config.server.bind);

    let served = axum::serve(listener, app).await;
    if let Some(handle) = sweeper {
        handle.abort();
    }
    served?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/answer", post(handle_answer))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

// ============ POST /answer ============

#[derive(Deserialize)]
struct AnswerRequest {
    query: String,
}

async fn handle_answer(
    State(state): State<AppState>,
    body: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<Answer>, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    Ok(Json(state.service.answer(&req.query).await))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    parents: usize,
    children: usize,
    built_at: i64,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        parents: state.artifacts.parents().len(),
        children: state.artifacts.children().len(),
        built_at: state.artifacts.built_at,
    })
}
