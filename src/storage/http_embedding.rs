//! HTTP-backed `EmbeddingProvider`, for any embedding service speaking the
//! common `{model, input}` -> `{data: [{embedding}]}` shape.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use super::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct EmbeddingClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl EmbeddingClientConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            dimensions,
            timeout_secs: 10,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);
    match catch_unwind(AssertUnwindSafe(|| Client::builder().timeout(timeout).build())) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("failed to build embedding HTTP client"),
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequestBody {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponseBody {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingErrorBody {
    error: EmbeddingErrorDetail,
}

#[derive(Debug, Deserialize)]
struct EmbeddingErrorDetail {
    message: String,
}

pub struct HttpEmbeddingProvider {
    config: EmbeddingClientConfig,
    http: Client,
}

impl HttpEmbeddingProvider {
    pub fn new(config: EmbeddingClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }
}

#[async_trait]
impl super::EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> StorageResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.config.base_url);
        let mut request = self.http.post(&url).json(&EmbeddingRequestBody {
            model: self.config.model.clone(),
            input: texts.to_vec(),
        });
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), request.send())
            .await
            .map_err(|_| StorageError::Timeout(self.config.timeout_secs * 1000))?
            .map_err(|e| StorageError::Unavailable(format!("embedding request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::Unavailable(format!("failed to read embedding response: {e}")))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<EmbeddingErrorBody>(&body) {
                return Err(StorageError::Unavailable(format!(
                    "embedding provider error: {}",
                    error.error.message
                )));
            }
            return Err(StorageError::Unavailable(format!(
                "embedding provider error ({status}): {body}"
            )));
        }

        let parsed: EmbeddingResponseBody = serde_json::from_str(&body)
            .map_err(|e| StorageError::Unavailable(format!("failed to parse embedding response: {e}")))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
