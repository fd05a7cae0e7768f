//! OpenRouter adapter for chat completions.
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol, so any server
//! exposing that route (a local Ollama or vLLM instance included) can stand in
//! via `OPENROUTER_BASE_URL`.
//!
//! The answer text is returned as-is. Summaries of documents about refusals
//! legitimately contain refusal wording, so a refusal is only reported when
//! the provider says so: a content-policy error payload, or an empty answer
//! cut off by the content filter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::pricing::chat_cost;
use super::types::*;

/// Trait for chat completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

const PROVIDER: &str = "openrouter";
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest response body accepted (1MB).
const MAX_RESPONSE_BYTES: usize = 1_024 * 1_024;
/// Largest prompt accepted, summed over all messages (~125k tokens).
const MAX_PROMPT_CHARS: usize = 500_000;

/// Chat completions over the OpenRouter API.
#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, None, None)
    }

    /// Reads `OPENROUTER_API_KEY` (required) plus the optional
    /// `OPENROUTER_BASE_URL`, `OPENROUTER_TIMEOUT_SECONDS`,
    /// `OPENROUTER_REFERER` and `OPENROUTER_APP_TITLE`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;
        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        Self::with_config(
            api_key,
            base_url,
            timeout,
            std::env::var("OPENROUTER_REFERER").ok(),
            std::env::var("OPENROUTER_APP_TITLE").ok(),
        )
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.into()))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, bearer);

        // Attribution headers are optional; unprintable values are dropped.
        let optional = [("HTTP-Referer", referer), ("X-Title", app_title)];
        for (name, value) in optional {
            if let Some(v) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(name, v);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<JsonObjectFormat>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(m: &'a Message) -> Self {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role,
            content: &m.content,
        }
    }
}

#[derive(Serialize)]
struct JsonObjectFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<ReplyChoice>,
    usage: Option<ReplyUsage>,
    error: Option<ReplyError>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: Option<ReplyMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ReplyToolCall>,
}

impl ReplyMessage {
    /// The answer text. Some providers put JSON-mode output into tool-call
    /// arguments and leave `content` blank.
    fn into_text(self) -> String {
        match self.content {
            Some(text) if !text.trim().is_empty() => text,
            _ => self
                .tool_calls
                .into_iter()
                .filter_map(|call| call.function.and_then(|f| f.arguments))
                .find(|args| !args.trim().is_empty())
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct ReplyToolCall {
    function: Option<ReplyFunction>,
}

#[derive(Deserialize)]
struct ReplyFunction {
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ReplyUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ReplyError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

impl ReplyError {
    fn code_string(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Content-policy blocks reported by the provider itself.
    fn is_policy_block(&self) -> bool {
        let code = self.code_string().unwrap_or_default().to_lowercase();
        let message = self.message.as_deref().unwrap_or_default().to_lowercase();
        matches!(
            code.as_str(),
            "content_filter" | "content_policy_violation" | "moderation"
        ) || message.contains("content policy")
            || message.contains("moderation")
    }

    fn into_error(self, retryable: bool, mut ctx: ErrorContext) -> ProviderError {
        if self.is_policy_block() {
            return ProviderError::refused(self.message.unwrap_or_default());
        }
        if let Some(code) = self.code_string() {
            ctx = ctx.with_code(code);
        }
        ProviderError::provider_with_context(
            PROVIDER,
            self.message.unwrap_or_default(),
            retryable,
            ctx,
        )
    }
}

// =============================================================================
// RESPONSE HANDLING
// =============================================================================

/// Reads the body, failing once it grows past `MAX_RESPONSE_BYTES`.
async fn read_capped(mut response: reqwest::Response) -> Result<String, ProviderError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if bytes.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(ProviderError::provider(
                PROVIDER,
                format!("Response too large: over {MAX_RESPONSE_BYTES} bytes"),
                false,
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn status_error(status: u16, body: &str, mut ctx: ErrorContext) -> ProviderError {
    let error = serde_json::from_str::<CompletionReply>(body)
        .ok()
        .and_then(|reply| reply.error);
    if status == 429 {
        if let Some(code) = error.as_ref().and_then(ReplyError::code_string) {
            ctx = ctx.with_code(code);
        }
        return ProviderError::rate_limited(PROVIDER, Duration::from_secs(60), ctx);
    }
    let retryable = status >= 500 || status == 408;
    match error {
        Some(error) => error.into_error(retryable, ctx),
        None => ProviderError::provider_with_context(
            PROVIDER,
            format!("HTTP {status}"),
            retryable,
            ctx,
        ),
    }
}

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let prompt_chars: usize = req.messages.iter().map(|m| m.content.len()).sum();
        if prompt_chars > MAX_PROMPT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {prompt_chars} chars (max {MAX_PROMPT_CHARS})"
            )));
        }

        let body = CompletionBody {
            model: req.model.model_id(),
            messages: req.messages.iter().map(WireMessage::from).collect(),
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(JsonObjectFormat {
                kind: "json_object",
            }),
        };

        let start = Instant::now();
        let response = self.client.post(self.chat_url()).json(&body).send().await?;

        let status = response.status().as_u16();
        let mut ctx = ErrorContext::new().with_status(status);
        if let Some(id) = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
        {
            ctx = ctx.with_request_id(id);
        }

        let text = read_capped(response).await?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, &text, ctx));
        }

        let reply: CompletionReply = serde_json::from_str(&text).map_err(|e| {
            ProviderError::provider_with_context(PROVIDER, format!("Invalid JSON: {e}"), false, ctx.clone())
        })?;
        if let Some(error) = reply.error {
            return Err(error.into_error(false, ctx));
        }

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::provider(PROVIDER, "No choices in response", false))?;
        let finish_reason = FinishReason::from(choice.finish_reason);
        let content = choice.message.map(ReplyMessage::into_text).unwrap_or_default();

        if content.trim().is_empty() {
            if finish_reason == FinishReason::ContentFilter {
                return Err(ProviderError::refused("answer withheld by content filter"));
            }
            return Err(ProviderError::EmptyResponse { provider: PROVIDER });
        }

        // Local servers frequently omit usage; treat it as zero-cost.
        let (input_tokens, output_tokens) = reply
            .usage
            .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            cost_nanodollars: chat_cost(req.model.model_id(), input_tokens, output_tokens),
            latency: start.elapsed(),
            finish_reason,
        })
    }
}
