//! Provider gateway for chat completions and embeddings.
//!
//! The pipeline only sees the [`ChatGateway`] and [`EmbeddingGateway`] traits.
//! [`ProviderGateway`] is the production implementation: one HTTP attempt per
//! call, usage recorded for every outcome. Retrying is the caller's concern
//! (see [`crate::retry`]).

pub mod error;
pub mod openai;
pub mod openrouter;
pub mod pricing;
pub mod types;
pub mod usage;

use std::sync::Arc;

use openai::{EmbeddingProvider, OpenAiEmbeddingAdapter};
use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use pricing::*;
pub use types::*;
pub use usage::{MemoryUsageSink, TracingUsageSink, UsageSink, UsageTotals};

/// Text-completion service.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Text-embedding service.
#[async_trait::async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed(&self, req: EmbedRequest) -> Result<EmbedResponse, ProviderError>;
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    openrouter: OpenRouterAdapter,
    embedder: Option<OpenAiEmbeddingAdapter>,
    usage_sink: Arc<U>,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> EmbeddingGateway for ProviderGateway<U> {
    async fn embed(&self, req: EmbedRequest) -> Result<EmbedResponse, ProviderError> {
        ProviderGateway::embed(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    /// Build both adapters from the environment.
    ///
    /// A missing embeddings configuration is not fatal: the consistency stage
    /// degrades to `Unknown` when embedding calls fail.
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let openrouter = OpenRouterAdapter::from_env()?;
        let embedder = match OpenAiEmbeddingAdapter::from_env() {
            Ok(adapter) => Some(adapter),
            Err(err) => {
                tracing::warn!(error = %err, "embeddings unavailable; consistency will be Unknown");
                None
            }
        };
        Ok(Self::new(openrouter, embedder, usage_sink))
    }

    pub fn new(
        openrouter: OpenRouterAdapter,
        embedder: Option<OpenAiEmbeddingAdapter>,
        usage_sink: Arc<U>,
    ) -> Self {
        Self {
            openrouter,
            embedder,
            usage_sink,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let result = self.openrouter.chat(&req).await;

        let record = ProviderCallRecord::new(
            req.model.provider(),
            "chat/completions",
            req.model.model_id(),
            req.attribution.caller,
        )
        .run(req.attribution.run_id)
        .candidate(req.attribution.candidate);

        let record = match &result {
            Ok(resp) => record
                .tokens(resp.input_tokens, resp.output_tokens)
                .cost(resp.cost_nanodollars)
                .latency(resp.latency.as_millis() as u64),
            Err(err) => record.error(err.code()),
        };
        self.usage_sink.record(record).await;

        result
    }

    pub async fn embed(&self, req: EmbedRequest) -> Result<EmbedResponse, ProviderError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| ProviderError::config("no embeddings endpoint configured"))?;

        let result = embedder.embed(&req).await;

        let record = ProviderCallRecord::new(
            req.model.provider(),
            "embeddings",
            req.model.as_str(),
            req.attribution.caller,
        )
        .run(req.attribution.run_id)
        .candidate(req.attribution.candidate);

        let record = match &result {
            Ok(resp) => record
                .tokens(resp.tokens, 0)
                .cost(resp.cost_nanodollars)
                .latency(resp.latency.as_millis() as u64),
            Err(err) => record.error(err.code()),
        };
        self.usage_sink.record(record).await;

        result
    }
}
