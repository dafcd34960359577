//! # setops
//!
//! Streaming set algebra over large tabular flat files. Two collections of
//! delimited-text or spreadsheet files are staged into an ephemeral embedded
//! database, deduplicated, combined with one of {intersection, union,
//! difference A-B, difference B-A}, and the result is streamed back out to a
//! single file. Everything runs under bounded memory, with cooperative
//! cancellation and progress telemetry.

pub mod cli;
pub mod error;
pub mod events;
pub mod export;
pub mod ingest;
pub mod ops;
pub mod pipeline;
pub mod progress;
pub mod store;

pub use error::{Result, SetOpsError};
pub use events::{CancelToken, ErrorEvent, EventSink, PipelineEvent, ProgressEvent, Stage};
pub use export::ExportFormat;
pub use ops::SetOperation;
pub use pipeline::{Pipeline, PipelineConfig, RunPlan, RunSummary};

/// Default number of rows read per chunk during import
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// Default number of rows fetched per page during export
pub const DEFAULT_EXPORT_PAGE_SIZE: usize = 50_000;

/// Default number of appended rows between transaction commits
pub const DEFAULT_COMMIT_INTERVAL: u64 = 1_000_000;

/// Fixed name of the relation holding a set operation's result
pub const RESULT_RELATION: &str = "result";
