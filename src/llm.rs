//! Language-model backends.
//!
//! [`OpenAiCompatibleModel`] talks to any `/chat/completions` endpoint
//! that speaks the OpenAI wire format. [`TimeoutModel`] bounds a model
//! call so a slow provider cannot stall a query.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use phaply_core::LanguageModel;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::LlmConfig;
use crate::openai::OpenAiClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model did not answer within {0:?}")]
    Timeout(Duration),
    #[error("language model response has no message content")]
    EmptyChoice,
}

pub struct OpenAiCompatibleModel {
    client: OpenAiClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatibleModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        let client = OpenAiClient::new(
            &config.base_url,
            &config.api_key_env,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self {
            client,
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "user", "content": prompt}
            ],
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = self.request_body(prompt);
        let json = self.client.post_json("chat/completions", &body).await?;
        Ok(parse_chat_response(&json)?)
    }
}

fn parse_chat_response(json: &Value) -> Result<String, LlmError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or(LlmError::EmptyChoice)
}

/// Fails a call with [`LlmError::Timeout`] once `limit` has elapsed.
pub struct TimeoutModel<L> {
    inner: L,
    limit: Duration,
}

impl<L> TimeoutModel<L> {
    pub fn new(inner: L, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<L: LanguageModel> LanguageModel for TimeoutModel<L> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        match tokio::time::timeout(self.limit, self.inner.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.limit).into()),
        }
    }
}

/// Configured model wrapped in the `llm.timeout_secs` bound.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    let limit = Duration::from_secs(config.timeout_secs);
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(TimeoutModel::new(OpenAiCompatibleModel::new(config)?, limit))),
        "disabled" => bail!("No language model configured. Set [llm] provider = \"openai\" and a model."),
        other => bail!("Unknown llm provider: {}", other),
    }
}
