mod diff;
mod executor;
mod planner;
mod registry;
mod report;

pub use diff::{diff_all, CatalogSnapshot};
pub use executor::{Executor, TableExecution};
pub use planner::{MigrationStep, Planner, TablePlan};
pub use registry::{ColumnSpec, DefaultExpr, SchemaRegistry, SqlType, TableSpec};
pub use report::{MigrationResult, RunOutcome, TableReport, TableStatus, ValidationReport};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, error, info, warn, Level};
use logging_timer::timer;

use crate::db::SchemaStore;
use crate::error::SchemaHealError;

/// Where a run is. Transitions only move forward; there is no retry inside a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    ReadingCatalog,
    Diffing,
    Planning,
    Executing,
    Done(RunOutcome),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "NOT_STARTED"),
            RunState::ReadingCatalog => write!(f, "READING_CATALOG"),
            RunState::Diffing => write!(f, "DIFFING"),
            RunState::Planning => write!(f, "PLANNING"),
            RunState::Executing => write!(f, "EXECUTING"),
            RunState::Done(outcome) => write!(f, "DONE({})", outcome),
        }
    }
}

struct RunTracker {
    state: RunState,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            state: RunState::NotStarted,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!("Reconcile: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Drives one registry against one store.
///
/// `reconcile()` reads, diffs, plans, executes and reports. `validate()` stops
/// after the diff and never writes.
pub struct Reconciler<'r> {
    registry: &'r SchemaRegistry,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'r> Reconciler<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            interrupt: None,
        }
    }

    /// Checked before every DDL step. Raising it ends the run early; steps
    /// already applied stay applied.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn reconcile(&self, store: &dyn SchemaStore) -> MigrationResult {
        let _tmr = timer!(Level::Debug; "Reconciler::reconcile");
        let mut run = RunTracker::new();
        info!(
            "Starting schema reconciliation for {} table(s)",
            self.registry.len()
        );
        if self.registry.is_empty() {
            warn!("Schema registry is empty - nothing to reconcile");
        }

        run.advance(RunState::ReadingCatalog);
        let snapshot = match CatalogSnapshot::read(store, self.registry) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Cannot read catalog - nothing will be planned: {}", e);
                run.advance(RunState::Done(RunOutcome::Failed));
                return MigrationResult::catalog_unavailable(&e.to_string());
            }
        };

        run.advance(RunState::Diffing);
        let drift = diff_all(self.registry, &snapshot);

        run.advance(RunState::Planning);
        let planner = Planner::new();
        let mut plans: BTreeMap<&str, TablePlan> = BTreeMap::new();
        for (table, entry) in &drift {
            if entry.table_missing {
                warn!(
                    "Table '{}' does not exist - left to table creation",
                    table
                );
                continue;
            }
            if let Some(spec) = self.registry.table(table) {
                plans.insert(table, planner.plan(table, &entry.missing_in_db, spec));
            }
        }

        run.advance(RunState::Executing);
        let mut executor = Executor::new(store);
        if let Some(flag) = &self.interrupt {
            executor = executor.with_interrupt(Arc::clone(flag));
        }

        let steps: Vec<MigrationStep> = plans
            .values_mut()
            .flat_map(|plan| std::mem::take(&mut plan.steps))
            .collect();
        let mut executions: BTreeMap<String, TableExecution> = executor
            .execute(&steps)
            .into_iter()
            .map(|exec| (exec.table.clone(), exec))
            .collect();

        let mut interrupted = false;
        let mut tables = Vec::with_capacity(drift.len());
        for (table, entry) in &drift {
            let status = match plans.remove(table.as_str()) {
                None => TableStatus::TableMissing,
                Some(plan) => {
                    // Tables with no planned steps never reach the executor
                    let exec = executions
                        .remove(table)
                        .unwrap_or_else(|| TableExecution::new(table));
                    interrupted |= exec.interrupted;
                    if !exec.already_present.is_empty() {
                        debug!(
                            "'{}': already present: {:?}",
                            table, exec.already_present
                        );
                    }
                    table_status(plan.refused, exec)
                }
            };
            tables.push(TableReport {
                table: table.clone(),
                status,
                extra_in_db: entry.extra_in_db.clone(),
            });
        }

        let result = MigrationResult::from_tables(tables, interrupted);
        run.advance(RunState::Done(result.outcome));

        if result.success {
            info!(
                "Schema reconciliation complete: added {} column(s)",
                result.added.len()
            );
        } else {
            warn!(
                "Schema reconciliation finished {}: added {} column(s)",
                result.outcome,
                result.added.len()
            );
        }

        result
    }

    /// Read and diff only. Never calls the executor.
    pub fn validate(&self, store: &dyn SchemaStore) -> Result<ValidationReport, SchemaHealError> {
        let _tmr = timer!(Level::Debug; "Reconciler::validate");
        let snapshot = CatalogSnapshot::read(store, self.registry)?;
        let report = ValidationReport::new(diff_all(self.registry, &snapshot));

        if report.in_sync {
            info!("Schema validation passed - no drift detected");
        } else {
            warn!(
                "Schema drift detected: {} missing column(s)",
                report.missing_column_count()
            );
        }

        Ok(report)
    }
}

fn failure_line(err: &SchemaHealError) -> String {
    match err.column() {
        Some(column) => format!("{} ({})", column, err.report_reason()),
        None => err.to_string(),
    }
}

fn table_status(refused: Vec<SchemaHealError>, exec: TableExecution) -> TableStatus {
    let mut failures: Vec<String> = refused.iter().map(failure_line).collect();

    if let Some(err) = &exec.failure {
        failures.push(failure_line(err));
    }
    let skip_reason = if exec.interrupted {
        "interrupted"
    } else {
        "skipped after earlier failure"
    };
    failures.extend(
        exec.skipped
            .iter()
            .map(|col| format!("{} ({})", col, skip_reason)),
    );

    if !failures.is_empty() || !exec.succeeded() {
        TableStatus::Failed {
            failures,
            added_before_failure: exec.added,
        }
    } else if !exec.added.is_empty() {
        TableStatus::Added {
            columns: exec.added,
        }
    } else {
        TableStatus::UpToDate
    }
}
