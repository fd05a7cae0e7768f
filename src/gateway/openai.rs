//! OpenAI-compatible embeddings adapter.
//!
//! Works against api.openai.com and any server exposing `/embeddings` with the
//! same request/response shape.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::pricing::embedding_cost;
use super::types::{EmbedRequest, EmbedResponse};

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, req: &EmbedRequest) -> Result<EmbedResponse, ProviderError>;
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Maximum texts per request; OpenAI caps batch input at 2048 entries.
const MAX_BATCH: usize = 2048;

#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingAdapter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct EmbedApiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedApiResponse {
    #[serde(default)]
    data: Vec<EmbedData>,
    usage: Option<EmbedUsage>,
    error: Option<EmbedApiError>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedUsage {
    #[serde(default)]
    total_tokens: Option<u32>,
    #[serde(default)]
    prompt_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct EmbedApiError {
    message: Option<String>,
}

impl OpenAiEmbeddingAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(60))
    }

    /// Create from environment variables.
    ///
    /// `EMBEDDINGS_API_KEY` wins over `OPENAI_API_KEY`. Keyless local servers
    /// can be used by setting `EMBEDDINGS_BASE_URL` alone.
    pub fn from_env() -> Result<Self, ProviderError> {
        let base_url =
            std::env::var("EMBEDDINGS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let api_key = std::env::var("EMBEDDINGS_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .or_else(|e| {
                if base_url == DEFAULT_BASE_URL {
                    Err(e)
                } else {
                    Ok(String::new())
                }
            })
            .map_err(|_| ProviderError::config("EMBEDDINGS_API_KEY / OPENAI_API_KEY not set"))?;

        let timeout = std::env::var("EMBEDDINGS_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        Self::with_config(api_key, base_url, timeout)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !api_key.is_empty() {
            let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| ProviderError::config("Invalid API key format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingAdapter {
    async fn embed(&self, req: &EmbedRequest) -> Result<EmbedResponse, ProviderError> {
        if req.texts.is_empty() {
            return Err(ProviderError::invalid_request("no texts to embed"));
        }
        if req.texts.len() > MAX_BATCH {
            return Err(ProviderError::invalid_request(format!(
                "too many texts: {} (max {MAX_BATCH})",
                req.texts.len()
            )));
        }

        let start = Instant::now();
        let response = self
            .client
            .post(self.embeddings_url())
            .json(&EmbedApiRequest {
                model: req.model.as_str(),
                input: &req.texts,
            })
            .send()
            .await?;

        let status = response.status();
        let ctx = ErrorContext::new().with_status(status.as_u16());
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<EmbedApiResponse>(&body)
                .ok()
                .and_then(|p| p.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(match status.as_u16() {
                429 => ProviderError::rate_limited("embeddings", Duration::from_secs(20), ctx),
                code => ProviderError::provider_with_context(
                    "embeddings",
                    message,
                    code >= 500 || code == 408,
                    ctx,
                ),
            });
        }

        let parsed: EmbedApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider_with_context(
                "embeddings",
                format!("Invalid JSON: {e}"),
                false,
                ctx,
            )
        })?;

        if parsed.data.len() != req.texts.len() {
            return Err(if parsed.data.is_empty() {
                ProviderError::EmptyResponse {
                    provider: "embeddings",
                }
            } else {
                ProviderError::provider(
                    "embeddings",
                    format!(
                        "expected {} vectors, got {}",
                        req.texts.len(),
                        parsed.data.len()
                    ),
                    false,
                )
            });
        }

        // The API may return entries out of order; `index` is authoritative.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        let tokens = parsed
            .usage
            .and_then(|u| u.total_tokens.or(u.prompt_tokens))
            .unwrap_or(0);

        Ok(EmbedResponse {
            embeddings,
            tokens,
            cost_nanodollars: embedding_cost(req.model.as_str(), tokens),
            latency: start.elapsed(),
        })
    }
}
