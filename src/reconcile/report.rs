use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use serde::Serialize;
use strum::Display;

use super::diff::DriftEntry;

/// Terminal state of one run.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[strum(serialize_all = "UPPERCASE")]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

/// Per-table result line.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    UpToDate,
    Added {
        columns: Vec<String>,
    },
    TableMissing,
    Failed {
        /// `column (reason)` for each failed or refused column
        failures: Vec<String>,
        added_before_failure: Vec<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub status: TableStatus,
    pub extra_in_db: BTreeSet<String>,
}

impl TableReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, TableStatus::Failed { .. })
    }
}

/// Everything the caller gets back from `reconcile()`.
#[derive(Clone, Debug, Serialize)]
pub struct MigrationResult {
    pub added: Vec<(String, String)>,
    pub success: bool,
    pub outcome: RunOutcome,
    pub tables: Vec<TableReport>,
    pub report_text: String,
}

impl MigrationResult {
    pub fn from_tables(tables: Vec<TableReport>, interrupted: bool) -> Self {
        let added: Vec<(String, String)> = tables
            .iter()
            .flat_map(|t| {
                let cols: &[String] = match &t.status {
                    TableStatus::Added { columns } => columns,
                    TableStatus::Failed {
                        added_before_failure,
                        ..
                    } => added_before_failure,
                    _ => &[],
                };
                cols.iter().map(move |c| (t.table.clone(), c.clone()))
            })
            .collect();

        let failed = tables.iter().filter(|t| t.is_failed()).count();
        let healthy = tables.len() - failed;

        let outcome = if failed == 0 && !interrupted {
            RunOutcome::Success
        } else if healthy > 0 || !added.is_empty() {
            RunOutcome::Partial
        } else {
            RunOutcome::Failed
        };

        let report_text = render_reconcile(&tables, added.len(), failed, interrupted, outcome);

        Self {
            added,
            success: outcome == RunOutcome::Success,
            outcome,
            tables,
            report_text,
        }
    }

    /// The run never got past reading the catalog.
    pub fn catalog_unavailable(reason: &str) -> Self {
        let mut text = String::new();
        let _ = writeln!(text, "SCHEMA RECONCILIATION REPORT");
        let _ = writeln!(text, "FAILED: catalog unavailable: {}", reason);
        let _ = writeln!(text, "Summary: added 0 column(s)");
        let _ = write!(text, "Result: {}", RunOutcome::Failed);

        Self {
            added: Vec::new(),
            success: false,
            outcome: RunOutcome::Failed,
            tables: Vec::new(),
            report_text: text,
        }
    }
}

fn bracketed(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}

fn render_reconcile(
    tables: &[TableReport],
    added: usize,
    failed: usize,
    interrupted: bool,
    outcome: RunOutcome,
) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "SCHEMA RECONCILIATION REPORT");

    for t in tables {
        match &t.status {
            TableStatus::UpToDate => {
                let _ = writeln!(text, "{}: up to date", t.table);
            }
            TableStatus::Added { columns } => {
                let _ = writeln!(text, "{}: added columns: {}", t.table, bracketed(columns));
            }
            TableStatus::TableMissing => {
                let _ = writeln!(text, "{}: table missing (skipped)", t.table);
            }
            TableStatus::Failed {
                failures,
                added_before_failure,
            } => {
                let _ = writeln!(text, "{}: FAILED: {}", t.table, bracketed(failures));
                if !added_before_failure.is_empty() {
                    let _ = writeln!(
                        text,
                        "  added before failure: {}",
                        bracketed(added_before_failure)
                    );
                }
            }
        }
        if !t.extra_in_db.is_empty() {
            let extra: Vec<String> = t.extra_in_db.iter().cloned().collect();
            let _ = writeln!(text, "  extra columns (ignored): {}", bracketed(&extra));
        }
    }

    if interrupted {
        let _ = writeln!(text, "Run interrupted before all steps were applied");
    }
    let _ = writeln!(
        text,
        "Summary: added {} column(s), {} table(s) failed",
        added, failed
    );
    let _ = write!(text, "Result: {}", outcome);
    text
}

/// Output of the non-mutating `validate()`.
#[derive(Clone, Debug, Serialize)]
pub struct ValidationReport {
    pub in_sync: bool,
    pub entries: BTreeMap<String, DriftEntry>,
    pub report_text: String,
}

impl ValidationReport {
    pub fn new(entries: BTreeMap<String, DriftEntry>) -> Self {
        let in_sync = entries.values().all(DriftEntry::is_clean);
        let report_text = render_validation(&entries, in_sync);
        Self {
            in_sync,
            entries,
            report_text,
        }
    }

    /// Missing columns in tables that do exist.
    pub fn missing_column_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !e.table_missing)
            .map(|e| e.missing_in_db.len())
            .sum()
    }
}

fn render_validation(entries: &BTreeMap<String, DriftEntry>, in_sync: bool) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "SCHEMA VALIDATION REPORT");

    for (table, entry) in entries {
        if entry.table_missing {
            let _ = writeln!(text, "{}: table missing", table);
            continue;
        }

        if entry.missing_in_db.is_empty() {
            let _ = writeln!(text, "{}: in sync", table);
        } else {
            let missing: Vec<String> = entry.missing_in_db.iter().cloned().collect();
            let _ = writeln!(text, "{}: missing columns: {}", table, bracketed(&missing));
        }
        if !entry.extra_in_db.is_empty() {
            let extra: Vec<String> = entry.extra_in_db.iter().cloned().collect();
            let _ = writeln!(text, "  extra columns (ignored): {}", bracketed(&extra));
        }
    }

    let _ = write!(
        text,
        "Result: {}",
        if in_sync { "IN SYNC" } else { "DRIFT DETECTED" }
    );
    text
}
