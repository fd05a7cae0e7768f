use tempfile::tempdir;
use uuid::Uuid;
use veracity_harness::trace::Stage;
use veracity_harness::{CallTrace, JsonlTraceSink, TraceSink};

#[derive(Debug, serde::Deserialize)]
struct TraceRow {
    stage: String,
    candidate: usize,
    pass: Option<u32>,
    outcome: String,
    error: Option<String>,
}

#[test]
fn jsonl_trace_sink_writes_events_and_flushes_on_join() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let run_id = Uuid::new_v4();

    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    sink.record(
        CallTrace::new(run_id, Stage::Generate, 0, "openai/gpt-4o-mini")
            .attempts(1)
            .usage(100, 20, 42),
    )
    .unwrap();
    sink.record(
        CallTrace::new(run_id, Stage::Validate, 2, "openai/gpt-4o-mini")
            .pass(3)
            .attempts(3)
            .failed("timeout"),
    )
    .unwrap();

    drop(sink);
    worker.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<TraceRow> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].stage, "generate");
    assert_eq!(rows[0].outcome, "ok");
    assert_eq!(rows[0].pass, None);

    assert_eq!(rows[1].stage, "validate");
    assert_eq!(rows[1].candidate, 2);
    assert_eq!(rows[1].pass, Some(3));
    assert_eq!(rows[1].outcome, "failed");
    assert_eq!(rows[1].error.as_deref(), Some("timeout"));
}

#[test]
fn cloned_sinks_share_one_writer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");

    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    let other = sink.clone();
    let handle = std::thread::spawn(move || {
        for candidate in 0..5 {
            other
                .record(CallTrace::new(Uuid::nil(), Stage::Embed, candidate, "m"))
                .unwrap();
        }
    });
    sink.record(CallTrace::new(Uuid::nil(), Stage::Embed, 9, "m"))
        .unwrap();
    handle.join().unwrap();

    drop(sink);
    worker.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 6);
}
