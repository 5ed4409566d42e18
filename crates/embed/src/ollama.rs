use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use semsearch_common::{AppConfig, Result, SemsearchError};
use std::time::Duration;
use tracing::{debug, info};

use crate::embedder::{EmbedError, Embedder};
use crate::types::{EmbedRequest, EmbedResponse};

/// Ollama embeddings API client
///
/// Performs exactly one HTTP call per `embed`; retries belong to `EmbedPool`.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaEmbedder {
    /// Create new Ollama embedder
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SemsearchError::config(format!("Failed to create HTTP client: {}", e)))?;

        info!("Ollama embedder initialized: {} (model={})", base_url, model);
        Ok(Self {
            base_url,
            model,
            client,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.ollama_base_url.clone(),
            config.embedding_model.clone(),
            Duration::from_secs(config.embed_timeout_secs),
        )
    }

    /// Test connection to Ollama
    pub async fn test_connection(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Ollama connection test failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        debug!("Generating embedding - Model: {}, Text length: {}", self.model, text.len());

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let result: EmbedResponse = response.json().await.map_err(|e| {
            EmbedError::Unavailable(format!("Failed to parse embedding response: {}", e))
        })?;

        if result.embedding.is_empty() {
            return Err(EmbedError::Unavailable("Empty embedding from Ollama".to_string()));
        }

        debug!("Received embedding - Dimension: {}", result.embedding.len());
        Ok(result.embedding)
    }
}

fn classify_transport_error(e: reqwest::Error) -> EmbedError {
    if e.is_timeout() {
        EmbedError::Timeout
    } else {
        EmbedError::Unavailable(format!("Failed to send embedding request: {}", e))
    }
}

/// Map a non-success HTTP status onto an embedder failure kind
fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> EmbedError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => EmbedError::RateLimited { retry_after },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => EmbedError::Timeout,
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            EmbedError::InvalidInput(detail)
        }
        _ => EmbedError::Unavailable(detail),
    }
}

/// Only the delay-seconds form of Retry-After is honored
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
