use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use veracity_harness::gateway::openai::OpenAiEmbeddingAdapter;
use veracity_harness::gateway::openrouter::OpenRouterAdapter;
use veracity_harness::gateway::{MemoryUsageSink, ProviderGateway};
use veracity_harness::prompts::SUMMARY_PROMPTS;
use veracity_harness::text::split_sentences;
use veracity_harness::{
    run_pipeline, run_pipeline_with_trace_file, ConsistencyLevel, RetryPolicy,
    SourceConfidenceLevel, TrustConfig, TrustLevel,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const SOURCE: &str = "Quarterly report. Revenue rose four percent compared with the previous \
quarter, driven by subscription sales. Operating costs fell slightly as the company renegotiated \
supplier contracts. As a result, margins improved for the second quarter in a row. Management \
expects similar results next quarter.";

/// One summary per prompt variant, in prompt order.
const SUMMARIES: [&str; 3] = [
    "Revenue rose four percent. Costs fell slightly. Margins improved.",
    "Revenue grew by four percent. Costs were slightly lower. Margins got better.",
    "Revenue climbed four percent. The CEO resigned in March. Margins improved.",
];

type Judge = fn(&str) -> bool;

/// Answers summary prompts with fixed text and fact-check prompts by judging
/// each sentence of the embedded summary with `judge`.
struct ModelResponder {
    summaries: [&'static str; 3],
    judge: Judge,
}

fn summary_in(prompt: &str) -> &str {
    let start = prompt.find("<summary>").map(|i| i + "<summary>".len()).unwrap_or(0);
    let end = prompt.find("</summary>").unwrap_or(prompt.len());
    prompt[start..end].trim()
}

impl Respond for ModelResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let system = body["messages"][0]["content"].as_str().unwrap_or_default();
        let user = body["messages"][1]["content"].as_str().unwrap_or_default();

        let content = if body.get("response_format").is_some() {
            let summary = summary_in(user);
            let sentences: Vec<Value> = split_sentences(summary)
                .into_iter()
                .map(|s| json!({ "sentence": s, "supported": (self.judge)(s) }))
                .collect();
            let doc = json!({ "sentences": sentences, "confidence": "High" }).to_string();
            // One candidate's checker wraps its answer in a fence.
            if summary.contains("grew") {
                format!("```json\n{doc}\n```")
            } else {
                doc
            }
        } else {
            let index = SUMMARY_PROMPTS
                .iter()
                .position(|t| t.system.trim() == system)
                .expect("unknown summary prompt");
            self.summaries[index].to_string()
        };

        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 100, "completion_tokens": 20 }
        }))
    }
}

/// One-hot vector per summary, or the same vector for all of them.
struct EmbeddingResponder {
    summaries: [&'static str; 3],
    identical: bool,
}

impl Respond for EmbeddingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let text = body["input"][0].as_str().unwrap_or_default();
        let index = self.summaries.iter().position(|s| *s == text).unwrap_or(0);
        let mut vector = vec![0.0f32; 3];
        vector[if self.identical { 0 } else { index }] = 1.0;
        ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": vector }],
            "usage": { "prompt_tokens": 12, "total_tokens": 12 }
        }))
    }
}

async fn gateway(server: &MockServer) -> (ProviderGateway<MemoryUsageSink>, Arc<MemoryUsageSink>) {
    let chat =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5), None, None)
            .unwrap();
    let embed =
        OpenAiEmbeddingAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let usage = Arc::new(MemoryUsageSink::new());
    (ProviderGateway::new(chat, Some(embed), usage.clone()), usage)
}

fn config() -> TrustConfig {
    TrustConfig {
        retry: RetryPolicy::immediate(2),
        min_source_chars: 50,
        ..Default::default()
    }
}

async fn mount(server: &MockServer, judge: Judge, embeddings: Option<bool>) {
    mount_summaries(server, SUMMARIES, judge, embeddings).await;
}

async fn mount_summaries(
    server: &MockServer,
    summaries: [&'static str; 3],
    judge: Judge,
    embeddings: Option<bool>,
) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ModelResponder { summaries, judge })
        .mount(server)
        .await;

    let embed_mock = Mock::given(method("POST")).and(path("/embeddings"));
    match embeddings {
        Some(identical) => embed_mock.respond_with(EmbeddingResponder {
            summaries,
            identical,
        }),
        None => embed_mock.respond_with(ResponseTemplate::new(500)),
    }
    .mount(server)
    .await;
}

#[tokio::test]
async fn faithful_consistent_summaries_are_very_trustworthy() {
    let server = MockServer::start().await;
    mount(&server, |s| !s.contains("resigned"), Some(true)).await;

    let (gateway, usage) = gateway(&server).await;
    let config = config();
    let source = config.source(SOURCE).unwrap();

    let report = run_pipeline(&gateway, &gateway, &config, &source, None)
        .await
        .unwrap();

    assert_eq!(report.candidates.len(), 3);
    assert_eq!(report.consistency.level, ConsistencyLevel::High);
    assert_eq!(report.consistency.pairs.len(), 3);
    assert_eq!(report.verdict.best_summary_index, 0);
    assert_eq!(
        report.verdict.source_confidence_level,
        SourceConfidenceLevel::High
    );
    assert_eq!(report.verdict.trust_level, TrustLevel::VeryTrustworthy);
    assert!(report.verdict.review_sentences.is_empty());
    assert_eq!(report.best_summary, SUMMARIES[0]);

    // The fenced answers still decode.
    assert_eq!(report.candidates[1].best_run.supported_count, 3);
    // The invented sentence is caught.
    assert_eq!(
        report.candidates[2].best_run.unsupported_sentences,
        vec!["The CEO resigned in March."]
    );
    assert_eq!(report.candidates[2].local_sentence_count, 3);

    assert_eq!(usage.totals_for("generation::").calls, 3);
    assert_eq!(usage.totals_for("validation::").calls, 9);
    assert_eq!(usage.totals_for("consistency::").calls, 3);
    assert_eq!(report.cost.generation.input_tokens, 300);
    assert_eq!(report.cost.consistency.input_tokens, 36);
}

#[tokio::test]
async fn weak_support_and_divergent_summaries_are_not_reliable() {
    let server = MockServer::start().await;
    mount(
        &server,
        |s| !s.contains("resigned") && !s.contains("Margins"),
        Some(false),
    )
    .await;

    let (gateway, _) = gateway(&server).await;
    let config = config();
    let source = config.source(SOURCE).unwrap();

    let report = run_pipeline(&gateway, &gateway, &config, &source, None)
        .await
        .unwrap();

    assert_eq!(report.consistency.level, ConsistencyLevel::Low);
    assert_eq!(report.consistency.mean_similarity, Some(0.0));
    assert_eq!(report.verdict.best_summary_index, 0);
    assert_eq!(
        report.verdict.source_confidence_level,
        SourceConfidenceLevel::Medium
    );
    assert_eq!(report.verdict.trust_level, TrustLevel::NotReliable);
    assert_eq!(report.verdict.review_sentences, vec!["Margins improved."]);
}

#[tokio::test]
async fn embedding_outage_degrades_to_unknown_and_is_traced() {
    let server = MockServer::start().await;
    mount(&server, |_| true, None).await;

    let (gateway, _) = gateway(&server).await;
    let config = config();
    let source = config.source(SOURCE).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.jsonl");

    let report =
        run_pipeline_with_trace_file(&gateway, &gateway, &config, &source, Some(trace_path.clone()))
            .await
            .unwrap();

    assert_eq!(report.consistency.level, ConsistencyLevel::Unknown);
    assert_eq!(report.consistency.mean_similarity, None);
    assert_eq!(report.verdict.trust_level, TrustLevel::Trustworthy);
    assert_eq!(report.cost.consistency.failed_calls, 3);

    let received = server.received_requests().await.unwrap();
    let embed_requests = received
        .iter()
        .filter(|r| r.url.path() == "/embeddings")
        .count();
    assert_eq!(embed_requests, 6);

    let raw = std::fs::read_to_string(&trace_path).unwrap();
    let rows: Vec<Value> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(rows.len(), 15);
    let failed_embeds: Vec<&Value> = rows
        .iter()
        .filter(|r| r["stage"] == "embed" && r["outcome"] == "failed")
        .collect();
    assert_eq!(failed_embeds.len(), 3);
    assert!(failed_embeds.iter().all(|r| r["attempts"] == 2));
    assert!(rows
        .iter()
        .filter(|r| r["stage"] == "validate")
        .all(|r| r["pass"].as_u64().is_some()));
}

#[tokio::test]
async fn failed_generation_aborts_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (gateway, _) = gateway(&server).await;
    let config = config();
    let source = config.source(SOURCE).unwrap();

    let err = run_pipeline(&gateway, &gateway, &config, &source, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        veracity_harness::PipelineError::Generation(_)
    ));
    // Each of the three candidates used its full retry budget; nothing else ran.
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
}

const PERMIT_SOURCE: &str = "Planning notice. A developer applied for a permit to build a \
forty storey tower on the harbour front. After two public hearings the request was refused by \
the planning board, which cited the height of the building. The developer said it would appeal.";

const PERMIT_SUMMARIES: [&str; 3] = [
    "A developer sought a tower permit. The request was refused by the planning board.",
    "I cannot see the tower going ahead: the planning board refused the permit.",
    "The planning board refused a tower permit. The developer will appeal.",
];

#[tokio::test]
async fn summaries_that_report_a_refusal_are_scored_normally() {
    let server = MockServer::start().await;
    mount_summaries(&server, PERMIT_SUMMARIES, |_| true, Some(true)).await;

    let (gateway, _) = gateway(&server).await;
    let config = config();
    let source = config.source(PERMIT_SOURCE).unwrap();

    let report = run_pipeline(&gateway, &gateway, &config, &source, None)
        .await
        .unwrap();

    assert_eq!(report.candidates.len(), 3);
    assert_eq!(report.verdict.trust_level, TrustLevel::VeryTrustworthy);
    assert_eq!(report.best_summary, PERMIT_SUMMARIES[0]);
    // Fact-check answers quoting the refusal still count as supported.
    assert_eq!(report.candidates[0].best_run.supported_count, 2);
    assert!(report.candidates[0].best_run.unsupported_sentences.is_empty());
}
