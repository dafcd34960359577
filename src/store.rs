//! Ephemeral staging store backed by an embedded DuckDB database
//!
//! The store is working-memory overflow for a single pipeline run: a
//! uniquely-named database file under the configured temp directory, opened
//! with bulk-load tuning and a long-lived transaction that the stages commit
//! and restart at fixed intervals. Teardown removes the backing file with
//! bounded retries and never escalates a removal failure into a run failure.

use crate::error::{Result, SetOpsError};
use duckdb::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Number of attempts to remove the backing file on close
const REMOVE_RETRIES: u32 = 10;

/// Staging store configuration, supplied at pipeline construction
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the ephemeral database file
    pub temp_dir: PathBuf,
    /// DuckDB memory ceiling, e.g. "2GB"
    pub memory_limit: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            memory_limit: "2GB".to_string(),
        }
    }
}

/// Handle to the ephemeral staging store
///
/// All stages operate through this handle; none create their own store.
/// Only one pipeline run may use a given store instance at a time.
pub struct StagingStore {
    conn: Option<Connection>,
    db_path: PathBuf,
}

impl StagingStore {
    /// Create a uniquely-named backing file, open a tuned connection and
    /// begin the initial transaction. Failure here is fatal to the run.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let db_path = config
            .temp_dir
            .join(format!("setops-staging-{}.duckdb", Uuid::new_v4()));
        log::info!("Opening staging store at: {}", db_path.display());

        let conn = Connection::open(&db_path)
            .map_err(|e| SetOpsError::store(format!("Failed to open staging store: {}", e)))?;

        // Tune for bulk-load throughput
        let temp_dir = config.temp_dir.to_string_lossy().replace('\'', "''");
        let tuning = [
            format!("SET memory_limit='{}'", config.memory_limit.replace('\'', "''")),
            format!("SET temp_directory='{}'", temp_dir),
            "SET enable_progress_bar=false".to_string(),
        ];
        for sql in &tuning {
            conn.execute(sql, [])
                .map_err(|e| SetOpsError::store(format!("Failed to tune staging store: {}", e)))?;
        }

        conn.execute("BEGIN TRANSACTION", [])
            .map_err(|e| SetOpsError::store(format!("Failed to begin transaction: {}", e)))?;

        Ok(Self {
            conn: Some(conn),
            db_path,
        })
    }

    /// Path of the backing database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Borrow the underlying connection for prepared statements
    pub fn connection(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| SetOpsError::store("Staging store is closed"))
    }

    /// Execute a single statement inside the open transaction
    pub fn execute(&self, sql: &str) -> Result<usize> {
        let affected = self.connection()?.execute(sql, [])?;
        Ok(affected)
    }

    /// Commit the open transaction and immediately start a new one
    pub fn commit_and_restart(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("COMMIT", [])
            .map_err(|e| SetOpsError::store(format!("Commit failed: {}", e)))?;
        conn.execute("BEGIN TRANSACTION", [])
            .map_err(|e| SetOpsError::store(format!("Failed to restart transaction: {}", e)))?;
        Ok(())
    }

    /// Roll back the open transaction and immediately start a new one,
    /// leaving committed state exactly as it was
    pub fn rollback_and_restart(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("ROLLBACK", [])
            .map_err(|e| SetOpsError::store(format!("Rollback failed: {}", e)))?;
        conn.execute("BEGIN TRANSACTION", [])
            .map_err(|e| SetOpsError::store(format!("Failed to restart transaction: {}", e)))?;
        Ok(())
    }

    /// Create a staged relation with all-text columns
    pub fn create_relation(&self, name: &str, columns: &[String]) -> Result<()> {
        if columns.is_empty() {
            return Err(SetOpsError::schema(format!(
                "Cannot create relation '{}' with no columns",
                name
            )));
        }
        let column_defs = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        self.execute(&format!(
            "CREATE TABLE {} ({})",
            quote_ident(name),
            column_defs
        ))?;
        Ok(())
    }

    /// Whether a staged relation exists
    pub fn relation_exists(&self, name: &str) -> Result<bool> {
        let count: u64 = self.connection()?.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Column names of a staged relation, in schema order
    pub fn column_names(&self, name: &str) -> Result<Vec<String>> {
        let mut stmt = self.connection()?.prepare(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_name = ? ORDER BY ordinal_position",
        )?;
        let rows = stmt.query_map([name], |row| row.get::<_, String>(0))?;
        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        Ok(columns)
    }

    /// Row count of a staged relation
    pub fn row_count(&self, name: &str) -> Result<u64> {
        let count: u64 = self.connection()?.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Commit or roll back any open transaction, close the connection and
    /// remove the backing file. Idempotent; never returns an error. A file
    /// that cannot be removed after retries is renamed to an orphan name
    /// for later collection.
    pub fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        log::info!("Closing staging store: {}", self.db_path.display());

        if let Err(e) = conn.execute("COMMIT", []) {
            log::warn!("Commit during close failed: {}", e);
            if let Err(e) = conn.execute("ROLLBACK", []) {
                log::warn!("Rollback during close failed: {}", e);
            }
        }
        if let Err((_, e)) = conn.close() {
            log::error!("Failed to close staging store connection: {}", e);
        }

        self.remove_backing_file();
    }

    /// Remove the backing file with bounded retries; the file may be
    /// transiently locked right after the connection closes
    fn remove_backing_file(&self) {
        if !self.db_path.exists() {
            return;
        }
        for attempt in 0..REMOVE_RETRIES {
            match fs::remove_file(&self.db_path) {
                Ok(()) => {
                    log::info!("Removed staging file: {}", self.db_path.display());
                    return;
                }
                Err(e) => {
                    log::warn!(
                        "Attempt {} to remove staging file failed: {}",
                        attempt + 1,
                        e
                    );
                    std::thread::sleep(Duration::from_millis(200 + u64::from(attempt) * 100));
                }
            }
        }

        // Leave a clearly-marked orphan rather than the working name
        let orphan = self
            .db_path
            .with_extension(format!("orphan-{}.tmp", Uuid::new_v4()));
        match fs::rename(&self.db_path, &orphan) {
            Ok(()) => log::warn!("Staging file renamed to orphan: {}", orphan.display()),
            Err(e) => log::error!(
                "Failed to rename staging file {}: {}",
                self.db_path.display(),
                e
            ),
        }
    }
}

impl Drop for StagingStore {
    fn drop(&mut self) {
        // Cleanup must run on every exit path, including forced teardown
        self.close();
    }
}

/// Quote an identifier for use in SQL, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
