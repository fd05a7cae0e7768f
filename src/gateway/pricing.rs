//! Per-token prices in nanodollars (1e-9 USD).

/// Input and output price per token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    /// $1 per million tokens is 1000 nanodollars per token.
    const fn per_token(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        i64::from(input_tokens) * self.input_nanos_per_token
            + i64::from(output_tokens) * self.output_nanos_per_token
    }
}

/// Known models. Dated aliases share the base model's price.
const PRICES: &[(&str, ModelPricing)] = &[
    // embeddings: $0.13 and $0.02 per 1M tokens
    ("text-embedding-3-large", ModelPricing::per_token(130, 0)),
    ("text-embedding-3-small", ModelPricing::per_token(20, 0)),
    // summarizer and checker candidates routed through OpenRouter
    ("openai/gpt-4o-mini", ModelPricing::per_token(150, 600)),
    ("openai/gpt-4o-mini-2024-07-18", ModelPricing::per_token(150, 600)),
    ("openai/gpt-5-mini", ModelPricing::per_token(250, 2_000)),
    ("anthropic/claude-3-5-haiku", ModelPricing::per_token(800, 4_000)),
    ("meta-llama/llama-3.1-8b-instruct", ModelPricing::per_token(20, 50)),
    ("mistralai/mistral-small-3.1-24b-instruct", ModelPricing::per_token(100, 300)),
];

/// Unlisted chat models are charged pessimistically.
const UNKNOWN_CHAT: ModelPricing = ModelPricing::per_token(1_000, 5_000);
/// Unlisted embedding models are usually self-hosted.
const UNKNOWN_EMBED: ModelPricing = ModelPricing::per_token(0, 0);

pub fn lookup(model_id: &str) -> Option<ModelPricing> {
    PRICES
        .iter()
        .find(|(id, _)| *id == model_id)
        .map(|(_, price)| *price)
}

pub fn embedding_cost(model: &str, tokens: u32) -> i64 {
    lookup(model).unwrap_or(UNKNOWN_EMBED).cost(tokens, 0)
}

pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    lookup(model)
        .unwrap_or(UNKNOWN_CHAT)
        .cost(input_tokens, output_tokens)
}
