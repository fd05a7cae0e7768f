//! Per-call trace capture for pipeline runs.
//!
//! One [`CallTrace`] line is written for every external call the pipeline
//! makes, after retries have settled.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Embed,
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Ok,
    /// Call succeeded but the payload was unusable (empty text, bad JSON).
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallTrace {
    pub timestamp_ms: i64,
    pub run_id: Uuid,
    pub stage: Stage,
    pub candidate: usize,
    /// Fact-check pass number (1-based); only set for `Validate`.
    pub pass: Option<u32>,
    pub attempts: u32,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub provider_cost_nanodollars: i64,
    pub outcome: CallOutcome,
    pub error: Option<String>,
}

impl CallTrace {
    pub fn new(run_id: Uuid, stage: Stage, candidate: usize, model: impl Into<String>) -> Self {
        Self {
            timestamp_ms: now_epoch_ms(),
            run_id,
            stage,
            candidate,
            pass: None,
            attempts: 0,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            provider_cost_nanodollars: 0,
            outcome: CallOutcome::Ok,
            error: None,
        }
    }

    pub fn pass(mut self, pass: u32) -> Self {
        self.pass = Some(pass);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn usage(mut self, input_tokens: u32, output_tokens: u32, cost_nanodollars: i64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.provider_cost_nanodollars = cost_nanodollars;
        self
    }

    pub fn rejected(mut self, reason: impl Into<String>) -> Self {
        self.outcome = CallOutcome::Rejected;
        self.error = Some(reason.into());
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.outcome = CallOutcome::Failed;
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: CallTrace) -> Result<(), TraceError>;
}

/// Identity of the current run plus where its call traces go.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub run_id: Uuid,
    pub trace: Option<&'a dyn TraceSink>,
}

impl<'a> RunContext<'a> {
    pub fn new(run_id: Uuid, trace: Option<&'a dyn TraceSink>) -> Self {
        Self { run_id, trace }
    }

    /// Fresh run id, no trace output.
    pub fn untraced() -> Self {
        Self::new(Uuid::new_v4(), None)
    }

    /// Record an event; a broken sink never fails the run.
    pub fn emit(&self, event: CallTrace) {
        if let Some(sink) = self.trace {
            if let Err(err) = sink.record(event) {
                tracing::warn!(error = %err, "dropping trace event");
            }
        }
    }
}

#[derive(Clone)]
pub struct JsonlTraceSink {
    sender: mpsc::Sender<CallTrace>,
}

pub struct TraceWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl TraceWorker {
    /// Wait for the writer to drain. Every sender clone must be dropped first.
    pub fn join(mut self) -> Result<(), TraceError> {
        let handle = self.handle.take();
        match handle {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TraceError::Join("trace worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlTraceSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<CallTrace>();
        let handle = std::thread::spawn(move || write_trace_loop(file, receiver));
        Ok((
            Self { sender },
            TraceWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: CallTrace) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_trace_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<CallTrace>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
