//! Deduplication and set algebra over staged relations

use crate::error::{Result, SetOpsError};
use crate::events::{EventSink, ProgressEvent, Stage};
use crate::store::{quote_ident, StagingStore};
use crate::RESULT_RELATION;
use serde::Serialize;
use std::time::Instant;

/// Set operation over two deduplicated relations of identical arity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum SetOperation {
    /// Rows present in both operands
    #[serde(rename = "intersection")]
    Intersection,
    /// Rows present in either operand, deduplicated
    #[serde(rename = "union")]
    Union,
    /// Rows of A not present in B
    #[serde(rename = "differenceAB")]
    DifferenceAb,
    /// Rows of B not present in A
    #[serde(rename = "differenceBA")]
    DifferenceBa,
}

impl SetOperation {
    /// Parse the operation tag used by external drivers
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "intersection" => Ok(Self::Intersection),
            "union" => Ok(Self::Union),
            "differenceAB" => Ok(Self::DifferenceAb),
            "differenceBA" => Ok(Self::DifferenceBa),
            other => Err(SetOpsError::validation(format!(
                "Unsupported operation: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intersection => "intersection",
            Self::Union => "union",
            Self::DifferenceAb => "differenceAB",
            Self::DifferenceBa => "differenceBA",
        }
    }
}

impl std::fmt::Display for SetOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapse a relation to its distinct rows, atomically replacing the
/// original. All-or-nothing: on failure the relation is left untouched.
pub fn deduplicate(store: &StagingStore, relation: &str, events: &EventSink) -> Result<u64> {
    let start = Instant::now();
    let columns = relation_columns(store, relation)?;
    let column_list = column_list(&columns);

    let result = (|| {
        let distinct = format!("{}_distinct", relation);
        store.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&distinct)))?;
        store.execute(&format!(
            "CREATE TABLE {} AS SELECT DISTINCT {} FROM {}",
            quote_ident(&distinct),
            column_list,
            quote_ident(relation)
        ))?;
        let count = store.row_count(&distinct)?;

        // Drop-and-rename in one transaction so no observer sees an
        // intermediate empty state
        store.execute(&format!("DROP TABLE {}", quote_ident(relation)))?;
        store.execute(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&distinct),
            quote_ident(relation)
        ))?;
        store.commit_and_restart()?;
        Ok(count)
    })();

    match result {
        Ok(count) => {
            log::info!("Deduplicated '{}' to {} distinct rows", relation, count);
            events.progress(ProgressEvent {
                stage: Stage::Deduplicate,
                processed_rows: count,
                total_estimate: count,
                elapsed_secs: start.elapsed().as_secs_f64(),
                rows_per_sec: 0.0,
                message: format!("Deduplicated {}", relation),
                source_file: None,
            });
            Ok(count)
        }
        Err(e) => {
            store.rollback_and_restart()?;
            Err(e)
        }
    }
}

/// Compute `op` over two deduplicated relations and materialize the rows
/// into the fixed result relation, replacing any prior one. Returns the
/// result relation name and its row count.
pub fn operate(
    store: &StagingStore,
    relation_a: &str,
    relation_b: &str,
    op: SetOperation,
    events: &EventSink,
) -> Result<(String, u64)> {
    let start = Instant::now();
    let columns_a = relation_columns(store, relation_a)?;
    let columns_b = relation_columns(store, relation_b)?;
    if columns_a.len() != columns_b.len() {
        return Err(SetOpsError::schema(format!(
            "Column count mismatch: '{}' has {}, '{}' has {}",
            relation_a,
            columns_a.len(),
            relation_b,
            columns_b.len()
        )));
    }

    // Covering indexes accelerate the set computation but are not required
    // for correctness; failure to build one is absorbed
    for (relation, columns) in [(relation_a, &columns_a), (relation_b, &columns_b)] {
        if let Err(e) = ensure_covering_index(store, relation, columns) {
            log::warn!("Could not index '{}': {}", relation, e);
        }
    }

    let result = (|| {
        store.execute(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(RESULT_RELATION)
        ))?;

        // Row comparison is positional-textual; column order comes from the
        // primary operand
        let (left, right, left_cols, right_cols) = match op {
            SetOperation::DifferenceBa => (relation_b, relation_a, &columns_b, &columns_a),
            _ => (relation_a, relation_b, &columns_a, &columns_b),
        };
        let combinator = match op {
            SetOperation::Intersection => "INTERSECT",
            SetOperation::Union => "UNION",
            SetOperation::DifferenceAb | SetOperation::DifferenceBa => "EXCEPT",
        };
        store.execute(&format!(
            "CREATE TABLE {} AS SELECT {} FROM {} {} SELECT {} FROM {}",
            quote_ident(RESULT_RELATION),
            column_list(left_cols),
            quote_ident(left),
            combinator,
            column_list(right_cols),
            quote_ident(right)
        ))?;

        let count = store.row_count(RESULT_RELATION)?;
        store.commit_and_restart()?;
        Ok(count)
    })();

    match result {
        Ok(count) => {
            log::info!("{} produced {} rows", op, count);
            events.progress(ProgressEvent {
                stage: Stage::Operation,
                processed_rows: count,
                total_estimate: count,
                elapsed_secs: start.elapsed().as_secs_f64(),
                rows_per_sec: 0.0,
                message: format!("Computed {}", op),
                source_file: None,
            });
            Ok((RESULT_RELATION.to_string(), count))
        }
        Err(e) => {
            store.rollback_and_restart()?;
            Err(e)
        }
    }
}

/// Columns of an existing relation, failing with a schema error when the
/// relation is missing or empty of columns
fn relation_columns(store: &StagingStore, relation: &str) -> Result<Vec<String>> {
    if !store.relation_exists(relation)? {
        return Err(SetOpsError::schema(format!(
            "Relation does not exist: {}",
            relation
        )));
    }
    let columns = store.column_names(relation)?;
    if columns.is_empty() {
        return Err(SetOpsError::schema(format!(
            "Relation has no columns: {}",
            relation
        )));
    }
    Ok(columns)
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Create an index over all columns unless the relation already carries one
fn ensure_covering_index(
    store: &StagingStore,
    relation: &str,
    columns: &[String],
) -> Result<()> {
    let indexed: u64 = store.connection()?.query_row(
        "SELECT COUNT(*) FROM duckdb_indexes() WHERE table_name = ?",
        [relation],
        |row| row.get(0),
    )?;
    if indexed > 0 {
        return Ok(());
    }
    store.execute(&format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(&format!("idx_{}_all", relation)),
        quote_ident(relation),
        column_list(columns)
    ))?;
    store.commit_and_restart()?;
    Ok(())
}
