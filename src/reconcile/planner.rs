use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::Serialize;

use super::registry::{quote_literal, ColumnSpec, DefaultExpr, TableSpec};
use crate::error::SchemaHealError;

/// One `ALTER TABLE ... ADD COLUMN` plus what to verify afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationStep {
    pub table: String,
    pub column: String,
    pub sql: String,
}

/// Planner output for one table.
#[derive(Debug, Default)]
pub struct TablePlan {
    pub steps: Vec<MigrationStep>,
    /// Columns refused as `UnsafeMigration`, in column order.
    pub refused: Vec<SchemaHealError>,
}

/// Turns missing columns into DDL.
///
/// SQLite refuses `ADD COLUMN` with a non-constant default, so `CURRENT_DATE`
/// and `CURRENT_TIMESTAMP` are evaluated once, at `now`, and emitted as literals.
pub struct Planner {
    now: DateTime<Utc>,
}

impl Planner {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn plan(
        &self,
        table_name: &str,
        missing: &BTreeSet<String>,
        spec: &TableSpec,
    ) -> TablePlan {
        let mut plan = TablePlan::default();

        for column in missing {
            let Some(col) = spec.column(column) else {
                // Differ only reports declared columns; nothing to build from.
                warn!(
                    "Planner: '{}.{}' is not declared - skipping",
                    table_name, column
                );
                continue;
            };

            match self.plan_column(table_name, col) {
                Ok(step) => {
                    debug!("Planned: {}", step.sql);
                    plan.steps.push(step);
                }
                Err(e) => {
                    error!("Planner refused '{}.{}': {}", table_name, column, e);
                    plan.refused.push(e);
                }
            }
        }

        plan
    }

    pub fn plan_column(
        &self,
        table_name: &str,
        col: &ColumnSpec,
    ) -> Result<MigrationStep, SchemaHealError> {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table_name,
            col.name,
            col.sql_type.type_clause()
        );

        if col.nullable {
            if let Some(expr) = col.default.as_ref().filter(|e| e.is_constant()) {
                sql.push_str(" DEFAULT ");
                sql.push_str(&expr.to_sql());
            }
        } else {
            let Some(expr) = col.default.as_ref() else {
                return Err(SchemaHealError::UnsafeMigration {
                    table: table_name.to_string(),
                    column: col.name.clone(),
                });
            };
            sql.push_str(" NOT NULL DEFAULT ");
            sql.push_str(&self.backfill_sql(expr));
        }

        Ok(MigrationStep {
            table: table_name.to_string(),
            column: col.name.clone(),
            sql,
        })
    }

    /// Literal that SQLite will accept in `ADD COLUMN ... DEFAULT`.
    fn backfill_sql(&self, expr: &DefaultExpr) -> String {
        match expr {
            DefaultExpr::CurrentDate => quote_literal(&self.now.format("%Y-%m-%d").to_string()),
            DefaultExpr::CurrentTimestamp => {
                quote_literal(&self.now.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            constant => constant.to_sql(),
        }
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}
