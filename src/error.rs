//! Error types for setops operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SetOpsError>;

#[derive(Error, Debug)]
pub enum SetOpsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet read error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Spreadsheet write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Schema error: {message}")]
    Schema { message: String },

    #[error("Staging store error: {message}")]
    Store { message: String },

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SetOpsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema {
            message: msg.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
        }
    }

    /// Whether the run can continue past this error.
    ///
    /// Per-file and per-chunk problems are recoverable and reported as
    /// events; store and output failures abort the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::Csv(_) | Self::Spreadsheet(_)
        )
    }
}
