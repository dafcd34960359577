//! Paginated export of the result relation to a tabular output file
//!
//! Rows are fetched in bounded offset/limit pages and appended to the
//! output, so the full result is never materialized in memory. The result
//! relation is read-only for the duration of the export.

use crate::error::{Result, SetOpsError};
use crate::events::{CancelToken, EventSink, ProgressEvent, Stage};
use crate::store::{quote_ident, StagingStore};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-delimited text
    Csv,
    /// Tab-delimited text
    Tsv,
    /// Spreadsheet binary
    Xlsx,
}

impl ExportFormat {
    /// Parse the format tag used by external drivers
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" | "txt" => Ok(Self::Tsv),
            "xlsx" => Ok(Self::Xlsx),
            other => Err(SetOpsError::validation(format!(
                "Unsupported export format: {}",
                other
            ))),
        }
    }

    /// Infer the format from an output path's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::parse(ext).ok()
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Xlsx => "xlsx",
        };
        f.write_str(name)
    }
}

/// Stream `relation` to `output_path`. Returns the number of rows written;
/// zero rows is a valid result and produces a header-only file. A raised
/// cancellation token stops after the current page and returns the partial
/// count.
pub fn export(
    store: &StagingStore,
    relation: &str,
    output_path: &Path,
    format: ExportFormat,
    page_size: usize,
    events: &EventSink,
    cancel: &CancelToken,
) -> Result<u64> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SetOpsError::validation(format!(
                    "Cannot create output directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    if !store.relation_exists(relation)? {
        return Err(SetOpsError::validation(
            "No result relation to export; run an operation first",
        ));
    }

    let columns = store.column_names(relation)?;
    if columns.is_empty() {
        return Err(SetOpsError::schema(format!(
            "Relation has no columns: {}",
            relation
        )));
    }
    let total = store.row_count(relation)?;
    log::info!(
        "Exporting {} rows from '{}' to {} as {}",
        total,
        relation,
        output_path.display(),
        format
    );

    let written = match format {
        ExportFormat::Csv => export_delimited(
            store, relation, &columns, total, output_path, b',', page_size, events, cancel,
        )?,
        ExportFormat::Tsv => export_delimited(
            store, relation, &columns, total, output_path, b'\t', page_size, events, cancel,
        )?,
        ExportFormat::Xlsx => export_spreadsheet(
            store, relation, &columns, total, output_path, page_size, events, cancel,
        )?,
    };

    log::info!("Export finished: {} rows written", written);
    Ok(written)
}

/// One offset/limit page of text rows
fn fetch_page(
    store: &StagingStore,
    relation: &str,
    columns: &[String],
    offset: u64,
    limit: usize,
) -> Result<Vec<Vec<Option<String>>>> {
    let mut stmt = store.connection()?.prepare(&format!(
        "SELECT * FROM {} LIMIT {} OFFSET {}",
        quote_ident(relation),
        limit,
        offset
    ))?;
    let width = columns.len();
    let rows = stmt.query_map([], |row| {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, Option<String>>(i)?);
        }
        Ok(values)
    })?;

    let mut page = Vec::new();
    for row in rows {
        page.push(row?);
    }
    Ok(page)
}

fn progress_event(
    stage_start: &Instant,
    processed: u64,
    total: u64,
    source: &Path,
) -> ProgressEvent {
    let elapsed = stage_start.elapsed().as_secs_f64();
    ProgressEvent {
        stage: Stage::Export,
        processed_rows: processed,
        total_estimate: total,
        elapsed_secs: elapsed,
        rows_per_sec: if elapsed > 0.0 {
            processed as f64 / elapsed
        } else {
            0.0
        },
        message: "Exporting result".to_string(),
        source_file: source
            .file_name()
            .map(|n| n.to_string_lossy().to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
fn export_delimited(
    store: &StagingStore,
    relation: &str,
    columns: &[String],
    total: u64,
    output_path: &Path,
    delimiter: u8,
    page_size: usize,
    events: &EventSink,
    cancel: &CancelToken,
) -> Result<u64> {
    let start = Instant::now();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(output_path)?;
    writer.write_record(columns)?;

    let mut written = 0u64;
    while written < total {
        if cancel.is_raised() {
            log::info!("Export cancelled after {} rows", written);
            break;
        }
        let page = fetch_page(store, relation, columns, written, page_size)?;
        if page.is_empty() {
            break;
        }
        for row in &page {
            // The missing value renders as an empty field
            writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        written += page.len() as u64;
        events.progress(progress_event(&start, written, total, output_path));
    }

    writer.flush()?;
    Ok(written)
}

#[allow(clippy::too_many_arguments)]
fn export_spreadsheet(
    store: &StagingStore,
    relation: &str,
    columns: &[String],
    total: u64,
    output_path: &Path,
    page_size: usize,
    events: &EventSink,
    cancel: &CancelToken,
) -> Result<u64> {
    let start = Instant::now();
    let mut workbook = rust_xlsxwriter::Workbook::new();
    // Constant-memory mode flushes each finished row to disk instead of
    // holding the whole sheet in memory
    let worksheet = workbook.add_worksheet_with_constant_memory();
    worksheet.set_name("Result")?;

    for (col, name) in columns.iter().enumerate() {
        worksheet.write_string(0, col as u16, name.as_str())?;
    }

    let mut written = 0u64;
    while written < total {
        if cancel.is_raised() {
            log::info!("Export cancelled after {} rows", written);
            break;
        }
        let page = fetch_page(store, relation, columns, written, page_size)?;
        if page.is_empty() {
            break;
        }
        for (i, row) in page.iter().enumerate() {
            let sheet_row = (written as u32) + (i as u32) + 1;
            for (col, value) in row.iter().enumerate() {
                if let Some(text) = value {
                    worksheet.write_string(sheet_row, col as u16, text.as_str())?;
                }
            }
        }
        written += page.len() as u64;
        events.progress(progress_event(&start, written, total, output_path));
    }

    workbook.save(output_path)?;
    Ok(written)
}
