//! Pipeline coordinator: the public operation surface for any driver
//!
//! One pipeline owns one staging store for the duration of a run. All
//! stages execute sequentially on whichever thread calls them (drivers
//! usually dedicate a worker thread); the driving side communicates only
//! through the event channel and the cancellation token.

use crate::error::{Result, SetOpsError};
use crate::events::{CancelToken, EventSink, ProgressEvent, Stage};
use crate::export::{export, ExportFormat};
use crate::ingest::{import_files, FileStats};
use crate::ops::{deduplicate, operate, SetOperation};
use crate::store::{StagingStore, StoreConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// Pipeline configuration, supplied at construction instead of read from
/// ambient global state
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory for the ephemeral staging file
    pub temp_dir: PathBuf,
    /// Staging store memory ceiling
    pub memory_limit: String,
    /// Rows per import chunk
    pub chunk_size: usize,
    /// Appended rows between transaction commits
    pub commit_interval: u64,
    /// Rows per export page
    pub export_page_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            memory_limit: "2GB".to_string(),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            commit_interval: crate::DEFAULT_COMMIT_INTERVAL,
            export_page_size: crate::DEFAULT_EXPORT_PAGE_SIZE,
        }
    }
}

/// Everything a complete run needs: both datasets, the operation and the
/// output destination. Immutable once processing starts.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub files_a: Vec<PathBuf>,
    pub files_b: Vec<PathBuf>,
    pub operation: SetOperation,
    pub output_path: PathBuf,
    pub format: ExportFormat,
}

/// Outcome of a full pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub operation: SetOperation,
    pub rows_imported_a: u64,
    pub rows_imported_b: u64,
    pub distinct_a: u64,
    pub distinct_b: u64,
    pub result_rows: u64,
    pub rows_exported: u64,
    pub file_stats_a: Vec<FileStats>,
    pub file_stats_b: Vec<FileStats>,
    pub cancelled: bool,
    pub elapsed_secs: f64,
}

/// Coordinator owning the staging store for one run at a time
pub struct Pipeline {
    config: PipelineConfig,
    events: EventSink,
    cancel: CancelToken,
    store: Option<StagingStore>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, events: EventSink, cancel: CancelToken) -> Self {
        Self {
            config,
            events,
            cancel,
            store: None,
        }
    }

    /// Open the staging store. Starting a second run on a live store is a
    /// caller error.
    pub fn initialize(&mut self) -> Result<()> {
        if self.store.is_some() {
            return Err(SetOpsError::validation(
                "A run is already active on this pipeline",
            ));
        }
        let store_config = StoreConfig {
            temp_dir: self.config.temp_dir.clone(),
            memory_limit: self.config.memory_limit.clone(),
        };
        self.store = Some(StagingStore::open(&store_config)?);
        Ok(())
    }

    fn store(&self) -> Result<&StagingStore> {
        self.store
            .as_ref()
            .ok_or_else(|| SetOpsError::store("Pipeline is not initialized"))
    }

    /// Import files into the named relation
    pub fn import(&self, files: &[PathBuf], relation: &str) -> Result<(u64, Vec<FileStats>)> {
        import_files(
            self.store()?,
            files,
            relation,
            self.config.chunk_size,
            self.config.commit_interval,
            &self.events,
            &self.cancel,
        )
    }

    /// Collapse the named relation to its distinct rows
    pub fn deduplicate(&self, relation: &str) -> Result<u64> {
        deduplicate(self.store()?, relation, &self.events)
    }

    /// Compute a set operation, materializing the result relation
    pub fn operate(
        &self,
        relation_a: &str,
        relation_b: &str,
        op: SetOperation,
    ) -> Result<(String, u64)> {
        operate(self.store()?, relation_a, relation_b, op, &self.events)
    }

    /// Stream the result relation to an output file
    pub fn export(&self, output_path: &std::path::Path, format: ExportFormat) -> Result<u64> {
        export(
            self.store()?,
            crate::RESULT_RELATION,
            output_path,
            format,
            self.config.export_page_size,
            &self.events,
            &self.cancel,
        )
    }

    /// Raise the cooperative stop signal; idempotent
    pub fn stop(&self) {
        self.cancel.raise();
    }

    /// Close the staging store and remove its backing file; idempotent and
    /// guaranteed not to fail the run
    pub fn teardown(&mut self) {
        if let Some(mut store) = self.store.take() {
            store.close();
            self.events.progress(ProgressEvent {
                stage: Stage::Teardown,
                processed_rows: 0,
                total_estimate: 0,
                elapsed_secs: 0.0,
                rows_per_sec: 0.0,
                message: "Staging store removed".to_string(),
                source_file: None,
            });
        }
    }

    /// Drive the complete control flow with guaranteed teardown:
    /// initialize, import A, dedup A, import B, dedup B, operate, export.
    /// Cancellation between stages ends the run early with the partial
    /// counts accumulated so far.
    pub fn run(&mut self, plan: &RunPlan) -> Result<RunSummary> {
        let start = Instant::now();
        self.initialize()?;
        let outcome = self.run_stages(plan, &start);
        // Cleanup runs on every exit path
        self.teardown();
        outcome
    }

    fn run_stages(&mut self, plan: &RunPlan, start: &Instant) -> Result<RunSummary> {
        let mut summary = RunSummary {
            operation: plan.operation,
            rows_imported_a: 0,
            rows_imported_b: 0,
            distinct_a: 0,
            distinct_b: 0,
            result_rows: 0,
            rows_exported: 0,
            file_stats_a: Vec::new(),
            file_stats_b: Vec::new(),
            cancelled: false,
            elapsed_secs: 0.0,
        };

        let done = |mut summary: RunSummary, start: &Instant, cancelled: bool| {
            summary.cancelled = cancelled;
            summary.elapsed_secs = start.elapsed().as_secs_f64();
            summary
        };

        let (rows_a, stats_a) = self.import(&plan.files_a, "side_a")?;
        summary.rows_imported_a = rows_a;
        summary.file_stats_a = stats_a;
        if self.cancel.is_raised() {
            return Ok(done(summary, start, true));
        }

        summary.distinct_a = self.deduplicate("side_a")?;
        if self.cancel.is_raised() {
            return Ok(done(summary, start, true));
        }

        let (rows_b, stats_b) = self.import(&plan.files_b, "side_b")?;
        summary.rows_imported_b = rows_b;
        summary.file_stats_b = stats_b;
        if self.cancel.is_raised() {
            return Ok(done(summary, start, true));
        }

        summary.distinct_b = self.deduplicate("side_b")?;
        if self.cancel.is_raised() {
            return Ok(done(summary, start, true));
        }

        let (_, result_rows) = self.operate("side_a", "side_b", plan.operation)?;
        summary.result_rows = result_rows;
        if self.cancel.is_raised() {
            return Ok(done(summary, start, true));
        }

        summary.rows_exported = self.export(&plan.output_path, plan.format)?;
        Ok(done(summary, start, self.cancel.is_raised()))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}
