use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};

use super::planner::MigrationStep;
use crate::db::{contains_ident, is_duplicate_column_message, SchemaStore};
use crate::error::SchemaHealError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnOutcome {
    /// This run issued the `ADD COLUMN` and saw it land.
    Added,
    /// Someone else got there first, either before the pre-check or in a race
    /// on the `ALTER TABLE` itself.
    AlreadyPresent,
}

/// What happened to one table's steps.
#[derive(Debug, Default)]
pub struct TableExecution {
    pub table: String,
    pub added: Vec<String>,
    pub already_present: Vec<String>,
    /// The failure that stopped this table, if any.
    pub failure: Option<SchemaHealError>,
    /// Steps not attempted because of `failure` or an interrupt.
    pub skipped: Vec<String>,
    pub interrupted: bool,
}

impl TableExecution {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && !self.interrupted
    }
}

/// Applies planned steps one at a time on a single store.
///
/// A failing table stops at its first failure; other tables carry on.
pub struct Executor<'a> {
    store: &'a dyn SchemaStore,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a dyn SchemaStore) -> Self {
        Self {
            store,
            interrupt: None,
        }
    }

    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Execute steps grouped by table, keeping first-seen table order.
    pub fn execute(&self, steps: &[MigrationStep]) -> Vec<TableExecution> {
        let mut tables: Vec<&str> = Vec::new();
        for step in steps {
            if !tables.contains(&step.table.as_str()) {
                tables.push(&step.table);
            }
        }

        tables
            .into_iter()
            .map(|table| {
                let table_steps: Vec<&MigrationStep> =
                    steps.iter().filter(|s| s.table == table).collect();
                self.execute_table(table, &table_steps)
            })
            .collect()
    }

    fn execute_table(&self, table: &str, steps: &[&MigrationStep]) -> TableExecution {
        let mut exec = TableExecution::new(table);

        for (i, step) in steps.iter().enumerate() {
            if self.is_interrupted() {
                warn!("Interrupted before '{}.{}'", step.table, step.column);
                exec.interrupted = true;
                exec.skipped = steps[i..].iter().map(|s| s.column.clone()).collect();
                break;
            }

            match self.apply_step(step) {
                Ok(ColumnOutcome::Added) => exec.added.push(step.column.clone()),
                Ok(ColumnOutcome::AlreadyPresent) => {
                    exec.already_present.push(step.column.clone())
                }
                Err(e) => {
                    error!("{}", e);
                    exec.failure = Some(e);
                    exec.skipped = steps[i + 1..].iter().map(|s| s.column.clone()).collect();
                    break;
                }
            }
        }

        exec
    }

    pub fn apply_step(&self, step: &MigrationStep) -> Result<ColumnOutcome, SchemaHealError> {
        match self.store.column_names(&step.table) {
            Ok(cols) if contains_ident(&cols, &step.column) => {
                info!(
                    "Column '{}.{}' already exists - nothing to do",
                    step.table, step.column
                );
                return Ok(ColumnOutcome::AlreadyPresent);
            }
            Ok(_) => {}
            // Unknown state counts as not yet migrated
            Err(e) => warn!(
                "Pre-check for '{}.{}' failed ({}) - attempting ALTER TABLE anyway",
                step.table, step.column, e
            ),
        }

        info!("Adding column '{}.{}'", step.table, step.column);
        if let Err(e) = self.store.execute_ddl(&step.sql) {
            return self.classify_ddl_failure(step, e);
        }

        match self.column_present(step) {
            Some(true) => {
                info!("Added column '{}.{}'", step.table, step.column);
                Ok(ColumnOutcome::Added)
            }
            _ => Err(SchemaHealError::VerificationFailed {
                table: step.table.clone(),
                column: step.column.clone(),
            }),
        }
    }

    /// A failed `ADD COLUMN` is a lost race if the column is there now. The
    /// catalog decides; the driver message is consulted only when the catalog
    /// cannot be read.
    fn classify_ddl_failure(
        &self,
        step: &MigrationStep,
        err: SchemaHealError,
    ) -> Result<ColumnOutcome, SchemaHealError> {
        let raced = match self.column_present(step) {
            Some(present) => present,
            None => is_duplicate_column_message(&err),
        };

        if raced {
            info!(
                "Column '{}.{}' was added concurrently - treating as done",
                step.table, step.column
            );
            return Ok(ColumnOutcome::AlreadyPresent);
        }

        let reason = match err {
            SchemaHealError::DatabaseError(inner) => inner.to_string(),
            other => other.to_string(),
        };
        Err(SchemaHealError::DdlExecutionFailed {
            table: step.table.clone(),
            column: step.column.clone(),
            reason,
        })
    }

    fn column_present(&self, step: &MigrationStep) -> Option<bool> {
        match self.store.column_names(&step.table) {
            Ok(cols) => Some(contains_ident(&cols, &step.column)),
            Err(e) => {
                warn!(
                    "Catalog re-check for '{}.{}' failed: {}",
                    step.table, step.column, e
                );
                None
            }
        }
    }
}
