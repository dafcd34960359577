//! Common test utilities and helpers

use setops::{
    CancelToken, EventSink, ExportFormat, Pipeline, PipelineConfig, PipelineEvent, RunPlan,
    SetOperation,
};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use tempfile::TempDir;

/// Temporary environment for a pipeline run: input files, staging dir and
/// output all live under one auto-removed directory
pub struct TestFixture {
    pub temp_dir: TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Write a small delimited file from raw lines
    pub fn create_file(&self, name: &str, lines: &[&str]) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, lines.join("\n") + "\n").expect("write test file");
        path
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            temp_dir: self.temp_dir.path().to_path_buf(),
            memory_limit: "512MB".to_string(),
            ..PipelineConfig::default()
        }
    }

    /// Pipeline wired to a live event channel and a fresh token
    pub fn pipeline(&self) -> (Pipeline, Receiver<PipelineEvent>, CancelToken) {
        let (events, receiver) = EventSink::channel();
        let cancel = CancelToken::new();
        let pipeline = Pipeline::new(self.config(), events, cancel.clone());
        (pipeline, receiver, cancel)
    }

    pub fn plan(
        &self,
        files_a: Vec<PathBuf>,
        files_b: Vec<PathBuf>,
        operation: SetOperation,
        output_name: &str,
    ) -> RunPlan {
        let output_path = self.path(output_name);
        let format = ExportFormat::from_path(&output_path).unwrap_or(ExportFormat::Csv);
        RunPlan {
            files_a,
            files_b,
            operation,
            output_path,
            format,
        }
    }

    /// Sorted data lines of an exported delimited file, header stripped
    pub fn exported_body(&self, name: &str) -> Vec<String> {
        let content = fs::read_to_string(self.path(name)).expect("read exported file");
        let mut lines: Vec<String> = content.lines().skip(1).map(str::to_string).collect();
        lines.sort();
        lines
    }

    /// Staging files still present under their working name
    pub fn staging_files(&self) -> Vec<PathBuf> {
        fs::read_dir(self.temp_dir.path())
            .expect("read temp dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .map(|n| {
                        let name = n.to_string_lossy();
                        name.starts_with("setops-staging-") && name.ends_with(".duckdb")
                    })
                    .unwrap_or(false)
            })
            .collect()
    }
}
