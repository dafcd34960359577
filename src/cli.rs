//! Command-line interface for setops

use crate::error::{Result, SetOpsError};
use crate::export::ExportFormat;
use crate::ops::SetOperation;
use crate::pipeline::{PipelineConfig, RunPlan};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "setops")]
#[command(about = "Set algebra (intersection, union, difference) over large tabular files")]
#[command(version)]
pub struct Cli {
    /// Input files for side A, in order (.csv, .txt, .tsv, .xlsx, .xls)
    #[arg(long = "side-a", required = true, num_args = 1.., value_name = "FILE")]
    pub side_a: Vec<PathBuf>,

    /// Input files for side B, in order
    #[arg(long = "side-b", required = true, num_args = 1.., value_name = "FILE")]
    pub side_b: Vec<PathBuf>,

    /// Set operation to compute
    #[arg(long, value_enum)]
    pub op: SetOperation,

    /// Destination path for the result file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Output format; inferred from the output extension when omitted
    #[arg(long, value_enum)]
    pub format: Option<ExportFormat>,

    /// Rows read per import chunk (must be > 0)
    #[arg(long, default_value = "50000", value_parser = validate_chunk_size)]
    pub chunk_size: usize,

    /// Directory for the ephemeral staging file (defaults to the system
    /// temp directory)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Memory ceiling for the staging store
    #[arg(long, default_value = "2GB")]
    pub memory_limit: String,

    /// Print the run summary as JSON instead of progress bars
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the full run plan, inferring the output format if needed
    pub fn plan(&self) -> Result<RunPlan> {
        let format = match self.format {
            Some(f) => f,
            None => ExportFormat::from_path(&self.output).ok_or_else(|| {
                SetOpsError::validation(format!(
                    "Cannot infer output format from '{}'; pass --format",
                    self.output.display()
                ))
            })?,
        };
        Ok(RunPlan {
            files_a: self.side_a.clone(),
            files_b: self.side_b.clone(),
            operation: self.op,
            output_path: self.output.clone(),
            format,
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            temp_dir: self
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            memory_limit: self.memory_limit.clone(),
            chunk_size: self.chunk_size,
            ..defaults
        }
    }
}

/// Validate that chunk size is greater than 0
fn validate_chunk_size(s: &str) -> std::result::Result<usize, String> {
    let chunk_size: usize = s
        .parse()
        .map_err(|_| format!("Invalid chunk size: '{}'. Must be a positive integer.", s))?;
    if chunk_size == 0 {
        return Err("Chunk size must be greater than 0".to_string());
    }
    Ok(chunk_size)
}
