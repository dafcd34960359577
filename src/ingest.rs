//! Chunked ingestion of tabular files into a staged relation
//!
//! Each source file is validated, then read in bounded-size chunks that are
//! appended inside the store's open transaction. The first chunk of the
//! first readable file fixes the relation's schema; every later chunk must
//! match its column count or the whole chunk is rejected and reported. One
//! bad file never blocks the rest of a multi-file import.

use crate::error::{Result, SetOpsError};
use crate::events::{CancelToken, EventSink, ProgressEvent, Stage};
use crate::store::StagingStore;
use calamine::{open_workbook_auto, Data, Reader};
use duckdb::appender_params_from_iter;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// A bounded batch of normalized rows; `None` is the distinguished missing
/// value, distinct from the empty string
type Chunk = Vec<Vec<Option<String>>>;

/// Supported input formats, detected from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Comma-delimited text (.csv)
    Comma,
    /// Tab-delimited text (.txt, .tsv)
    Tab,
    /// Spreadsheet binary (.xlsx, .xls)
    Spreadsheet,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Comma),
            "txt" | "tsv" => Some(Self::Tab),
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            _ => None,
        }
    }
}

/// Per-file import statistics, for caller display only
#[derive(Debug, Clone, Serialize)]
pub struct FileStats {
    pub file_name: String,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub extension: String,
    pub rows: u64,
}

/// Import files into `relation`, in order, creating it from the first
/// readable file's header. Returns the cumulative row count for this call
/// and per-file statistics. A raised cancellation token returns the partial
/// count accumulated so far rather than an error.
pub fn import_files(
    store: &StagingStore,
    files: &[PathBuf],
    relation: &str,
    chunk_size: usize,
    commit_interval: u64,
    events: &EventSink,
    cancel: &CancelToken,
) -> Result<(u64, Vec<FileStats>)> {
    if files.is_empty() {
        return Err(SetOpsError::validation("No input files given"));
    }

    let start = Instant::now();
    let mut schema: Option<Vec<String>> = if store.relation_exists(relation)? {
        Some(store.column_names(relation)?)
    } else {
        None
    };

    let mut total_rows = 0u64;
    let mut rows_since_commit = 0u64;
    let mut stats = Vec::new();

    'files: for path in files {
        if cancel.is_raised() {
            log::info!("Import cancelled before {}", path.display());
            break;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let (size_bytes, format) = match validate_file(path) {
            Ok(v) => v,
            Err(msg) => {
                log::warn!("Skipping {}: {}", path.display(), msg);
                events.error(msg, true);
                continue;
            }
        };

        let mut reader = match FileReader::open(path, format) {
            Ok(r) => r,
            Err(e) => {
                let msg = format!("Failed to read {}: {}", file_name, e);
                log::warn!("{}", msg);
                events.error(msg, true);
                continue;
            }
        };

        if schema.is_none() {
            let columns = sanitize_column_names(&reader.headers);
            if columns.is_empty() {
                let msg = format!("No header row in {}", file_name);
                log::warn!("{}", msg);
                events.error(msg, true);
                continue;
            }
            store.create_relation(relation, &columns)?;
            log::info!(
                "Created relation '{}' with {} columns from {}",
                relation,
                columns.len(),
                file_name
            );
            schema = Some(columns);
        }
        let arity = schema.as_ref().map(|s| s.len()).unwrap_or(0);

        let mut file_rows = 0u64;
        let mut file_failed = false;
        loop {
            if cancel.is_raised() {
                log::info!("Import cancelled mid-file: {}", file_name);
                break 'files;
            }

            let chunk = match reader.next_chunk(chunk_size) {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Source-read errors are file-scoped: skip the rest of
                    // this file, keep rows already appended from it
                    let msg = format!("Read error in {}: {}", file_name, e);
                    log::warn!("{}", msg);
                    events.error(msg, true);
                    file_failed = true;
                    break;
                }
            };
            if chunk.is_empty() {
                break;
            }

            if let Some(bad_width) = chunk.iter().map(Vec::len).find(|w| *w != arity) {
                let msg = format!(
                    "Rejected chunk from {}: {} columns, relation '{}' has {}",
                    file_name, bad_width, relation, arity
                );
                log::warn!("{}", msg);
                events.error(msg, true);
                file_failed = true;
                continue;
            }

            let appended = chunk.len() as u64;
            if let Err(e) = append_chunk(store, relation, &chunk) {
                // Store failures are fatal: the rollback discards every
                // uncommitted row, so no count may survive that claims them
                let msg = format!("Failed to append chunk from {}: {}", file_name, e);
                log::error!("{}", msg);
                events.error(msg, false);
                store.rollback_and_restart()?;
                return Err(e);
            }

            total_rows += appended;
            file_rows += appended;
            rows_since_commit += appended;

            // Bound transaction-log growth without giving up bulk throughput
            if rows_since_commit >= commit_interval {
                store.commit_and_restart()?;
                rows_since_commit = 0;
            }

            let elapsed = start.elapsed().as_secs_f64();
            events.progress(ProgressEvent {
                stage: Stage::Import,
                processed_rows: total_rows,
                // Running total stands in for the unknown true total
                total_estimate: total_rows,
                elapsed_secs: elapsed,
                rows_per_sec: if elapsed > 0.0 {
                    total_rows as f64 / elapsed
                } else {
                    0.0
                },
                message: format!("Importing {}", file_name),
                source_file: Some(file_name.clone()),
            });
        }

        // A file that contributed nothing and was reported as a problem is
        // not a processed file
        if file_rows == 0 && file_failed {
            continue;
        }

        log::info!("Imported {} rows from {}", file_rows, file_name);
        stats.push(FileStats {
            file_name,
            file_path: path.clone(),
            size_bytes,
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
            rows: file_rows,
        });
    }

    if rows_since_commit > 0 {
        store.commit_and_restart()?;
    }

    Ok((total_rows, stats))
}

/// Check existence, regular-file-ness, non-zero size and extension before
/// opening. Returns the file size and detected format.
fn validate_file(path: &Path) -> std::result::Result<(u64, InputFormat), String> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| format!("File not accessible: {}: {}", path.display(), e))?;
    if !metadata.is_file() {
        return Err(format!("Not a regular file: {}", path.display()));
    }
    if metadata.len() == 0 {
        return Err(format!("File is empty: {}", path.display()));
    }
    let format = InputFormat::from_path(path)
        .ok_or_else(|| format!("Unsupported file extension: {}", path.display()))?;
    // Readability is checked by actually opening the file
    File::open(path).map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
    Ok((metadata.len(), format))
}

/// Append one chunk inside the open transaction via the bulk appender
fn append_chunk(store: &StagingStore, relation: &str, chunk: &Chunk) -> Result<()> {
    let conn = store.connection()?;
    let mut appender = conn.appender(relation)?;
    for row in chunk {
        appender.append_row(appender_params_from_iter(row.iter()))?;
    }
    appender.flush()?;
    Ok(())
}

/// Sanitize raw header names into column names: trim, replace separator
/// characters, assign positional placeholders to empty names and make
/// duplicates unique
pub fn sanitize_column_names(raw: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(raw.len());
    for (i, name) in raw.iter().enumerate() {
        let mut clean: String = name
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' | '.' | '\t' | ',' => '_',
                other => other,
            })
            .collect();
        if clean.is_empty() {
            clean = format!("col_{}", i);
        }
        while columns.contains(&clean) {
            clean.push('_');
        }
        columns.push(clean);
    }
    columns
}

/// Chunk-wise row source over one tabular file
struct FileReader {
    headers: Vec<String>,
    source: RowSource,
}

enum RowSource {
    Delimited(csv::StringRecordsIntoIter<File>),
    Sheet(std::vec::IntoIter<Vec<Option<String>>>),
}

impl FileReader {
    fn open(path: &Path, format: InputFormat) -> Result<Self> {
        match format {
            InputFormat::Comma => Self::open_delimited(path, b','),
            InputFormat::Tab => Self::open_delimited(path, b'\t'),
            InputFormat::Spreadsheet => Self::open_spreadsheet(path),
        }
    }

    fn open_delimited(path: &Path, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        Ok(Self {
            headers,
            source: RowSource::Delimited(reader.into_records()),
        })
    }

    fn open_spreadsheet(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)?;
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| SetOpsError::validation(format!("No sheets in {}", path.display())))?;
        let range = workbook.worksheet_range(&sheet_name)?;

        let mut rows = range.rows();
        let headers = rows
            .next()
            .map(|cells| cells.iter().map(|c| c.to_string()).collect())
            .unwrap_or_default();
        let data: Vec<Vec<Option<String>>> = rows
            .map(|cells| cells.iter().map(cell_to_text).collect())
            .collect();

        Ok(Self {
            headers,
            source: RowSource::Sheet(data.into_iter()),
        })
    }

    /// Read up to `chunk_size` rows; an empty chunk signals end of file
    fn next_chunk(&mut self, chunk_size: usize) -> Result<Chunk> {
        let mut chunk = Vec::new();
        match &mut self.source {
            RowSource::Delimited(records) => {
                for record in records.by_ref().take(chunk_size) {
                    let record = record?;
                    chunk.push(record.iter().map(field_to_text).collect());
                }
            }
            RowSource::Sheet(rows) => {
                chunk.extend(rows.by_ref().take(chunk_size));
            }
        }
        Ok(chunk)
    }
}

/// Empty delimited fields carry no data and map to the missing value
fn field_to_text(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

/// Spreadsheet cells are rendered as text; empty cells map to the missing
/// value
fn cell_to_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StagingStore, StoreConfig};
    use std::fs;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> StagingStore {
        StagingStore::open(&StoreConfig {
            temp_dir: temp_dir.path().to_path_buf(),
            memory_limit: "512MB".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            InputFormat::from_path(Path::new("a.csv")),
            Some(InputFormat::Comma)
        );
        assert_eq!(
            InputFormat::from_path(Path::new("a.TSV")),
            Some(InputFormat::Tab)
        );
        assert_eq!(
            InputFormat::from_path(Path::new("a.txt")),
            Some(InputFormat::Tab)
        );
        assert_eq!(
            InputFormat::from_path(Path::new("a.xlsx")),
            Some(InputFormat::Spreadsheet)
        );
        assert_eq!(InputFormat::from_path(Path::new("a.parquet")), None);
        assert_eq!(InputFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_sanitize_column_names() {
        let raw = vec![
            " first name ".to_string(),
            "unit-price".to_string(),
            "a.b".to_string(),
            "".to_string(),
            "first_name".to_string(),
        ];
        assert_eq!(
            sanitize_column_names(&raw),
            vec!["first_name", "unit_price", "a_b", "col_3", "first_name_"]
        );
    }

    #[test]
    fn test_import_csv_basics() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let csv_path = temp_dir.path().join("input.csv");
        fs::write(&csv_path, "name,age\nAlice,30\nBob,\n").unwrap();

        let (rows, stats) = import_files(
            &store,
            &[csv_path],
            "side_a",
            1000,
            1_000_000,
            &EventSink::disabled(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(rows, 2);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].rows, 2);
        assert_eq!(stats[0].extension, "csv");
        assert_eq!(store.column_names("side_a").unwrap(), vec!["name", "age"]);

        // Empty field is stored as the missing value, not ''
        let nulls: u64 = store
            .connection()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM \"side_a\" WHERE \"age\" IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 1);
    }

    #[test]
    fn test_import_skips_missing_and_unsupported_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let good = temp_dir.path().join("good.csv");
        fs::write(&good, "id\n1\n").unwrap();
        let unsupported = temp_dir.path().join("bad.parquet");
        fs::write(&unsupported, "xx").unwrap();
        let missing = temp_dir.path().join("missing.csv");

        let (sink, rx) = EventSink::channel();
        let (rows, stats) = import_files(
            &store,
            &[missing, unsupported, good],
            "side_a",
            1000,
            1_000_000,
            &sink,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(stats.len(), 1);

        let errors: Vec<_> = rx
            .try_iter()
            .filter(|e| matches!(e, crate::events::PipelineEvent::Error(_)))
            .collect();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_mismatched_file_is_rejected_whole() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let two_cols = temp_dir.path().join("two.csv");
        fs::write(&two_cols, "a,b\n1,2\n3,4\n").unwrap();
        let three_cols = temp_dir.path().join("three.csv");
        fs::write(&three_cols, "a,b,c\n1,2,3\n").unwrap();

        let (sink, rx) = EventSink::channel();
        let (rows, stats) = import_files(
            &store,
            &[two_cols, three_cols],
            "side_a",
            1000,
            1_000_000,
            &sink,
            &CancelToken::new(),
        )
        .unwrap();

        // First file's rows are present, second file's chunk was rejected
        assert_eq!(rows, 2);
        assert_eq!(store.row_count("side_a").unwrap(), 2);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, crate::events::PipelineEvent::Error(_))));

        // Only the successfully processed file appears in the statistics
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].file_name, "two.csv");
    }

    #[test]
    fn test_append_failure_aborts_with_consistent_counts() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        // A NOT NULL column makes the appender reject a row with a missing
        // value, standing in for any store-side append failure
        store
            .execute("CREATE TABLE \"side_a\" (\"a\" TEXT, \"b\" TEXT NOT NULL)")
            .unwrap();
        store.commit_and_restart().unwrap();

        let bad = temp_dir.path().join("bad.csv");
        fs::write(&bad, "a,b\n1,x\n2,\n").unwrap();

        let (sink, rx) = EventSink::channel();
        let result = import_files(
            &store,
            &[bad],
            "side_a",
            1000,
            1_000_000,
            &sink,
            &CancelToken::new(),
        );

        assert!(result.is_err());
        // The rollback left the relation empty; no count claims otherwise
        assert_eq!(store.row_count("side_a").unwrap(), 0);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, crate::events::PipelineEvent::Error(err) if !err.recoverable)));
    }

    #[test]
    fn test_headerless_sheet_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let sheet = temp_dir.path().join("blank.xlsx");
        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.add_worksheet();
        workbook.save(&sheet).unwrap();

        let good = temp_dir.path().join("good.csv");
        fs::write(&good, "id\n1\n").unwrap();

        let (sink, rx) = EventSink::channel();
        let (rows, stats) = import_files(
            &store,
            &[sheet, good],
            "side_a",
            1000,
            1_000_000,
            &sink,
            &CancelToken::new(),
        )
        .unwrap();

        // The headerless sheet is reported and skipped, the rest imports
        assert_eq!(rows, 1);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].file_name, "good.csv");
        assert_eq!(store.column_names("side_a").unwrap(), vec!["id"]);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, crate::events::PipelineEvent::Error(err) if err.recoverable)));
    }

    #[test]
    fn test_cancel_between_files_returns_partial() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let a = temp_dir.path().join("a.csv");
        fs::write(&a, "id\n1\n2\n").unwrap();

        let cancel = CancelToken::new();
        cancel.raise();
        let (rows, stats) = import_files(
            &store,
            &[a],
            "side_a",
            1000,
            1_000_000,
            &EventSink::disabled(),
            &cancel,
        )
        .unwrap();
        assert_eq!(rows, 0);
        assert!(stats.is_empty());
    }

    #[test]
    fn test_import_same_file_twice_doubles() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let a = temp_dir.path().join("a.csv");
        fs::write(&a, "id\n1\n2\n3\n").unwrap();

        let (first, _) = import_files(
            &store,
            &[a.clone()],
            "side_a",
            1000,
            1_000_000,
            &EventSink::disabled(),
            &CancelToken::new(),
        )
        .unwrap();
        let (second, _) = import_files(
            &store,
            &[a],
            "side_a",
            1000,
            1_000_000,
            &EventSink::disabled(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(first, 3);
        assert_eq!(second, 3);
        assert_eq!(store.row_count("side_a").unwrap(), 6);
    }

    #[test]
    fn test_empty_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let empty = temp_dir.path().join("empty.csv");
        fs::write(&empty, "").unwrap();
        assert!(validate_file(&empty).is_err());
    }
}
