//! Typed progress/error events and the cooperative cancellation token
//!
//! The pipeline worker owns the sending half of a channel and the driving
//! side (CLI, service, UI) owns the receiving half. Emitting never blocks
//! and never fails the run: a driver that stopped listening is ignored.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

/// Pipeline stage a progress event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Import,
    Deduplicate,
    Operation,
    Export,
    Teardown,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Import => "import",
            Stage::Deduplicate => "deduplicate",
            Stage::Operation => "operation",
            Stage::Export => "export",
            Stage::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// Progress report emitted at chunk/batch granularity
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub processed_rows: u64,
    /// True total where known, otherwise a running estimate
    pub total_estimate: u64,
    pub elapsed_secs: f64,
    pub rows_per_sec: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

/// Recoverable problem reported without aborting the run
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub message: String,
    pub recoverable: bool,
}

/// Event stream flowing from the pipeline worker to the driver
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Progress(ProgressEvent),
    Error(ErrorEvent),
}

/// Sending half of the event stream held by the pipeline
#[derive(Clone)]
pub struct EventSink {
    tx: Option<Sender<PipelineEvent>>,
}

impl EventSink {
    /// Create a connected sink/receiver pair
    pub fn channel() -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops every event, for embedders that do not listen
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver must not fail the pipeline
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, event: ProgressEvent) {
        self.emit(PipelineEvent::Progress(event));
    }

    pub fn error(&self, message: impl Into<String>, recoverable: bool) {
        self.emit(PipelineEvent::Error(ErrorEvent {
            message: message.into(),
            recoverable,
        }));
    }
}

/// Shared stop flag polled between units of work, never preemptive
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    raised: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cooperative stop; idempotent
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Relaxed);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }
}
