mod base;

pub use base::create_missing_tables;

use once_cell::sync::Lazy;

use crate::error::SchemaHealError;
use crate::reconcile::{ColumnSpec, DefaultExpr, SchemaRegistry, SqlType, TableSpec};

use DefaultExpr::{Bool, CurrentDate, CurrentTimestamp, Integer, Text};
use SqlType::{Boolean, Date, DoublePrecision, Integer as Int, TimestampTz, Varchar};

/// The expected schema compiled into this binary.
///
/// Mirrors the application's entity definitions. Adding a column to the
/// database is a matter of adding a line here.
pub fn builtin() -> &'static SchemaRegistry {
    static REGISTRY: Lazy<SchemaRegistry> =
        Lazy::new(|| build().expect("built-in schema declarations are valid"));
    &REGISTRY
}

fn col(name: &str, sql_type: SqlType) -> ColumnSpec {
    ColumnSpec::new(name, sql_type)
}

/// Audit timestamp: nullable, stamped by the database on insert.
fn stamp(name: &str) -> ColumnSpec {
    col(name, TimestampTz).with_default(CurrentTimestamp)
}

fn build() -> Result<SchemaRegistry, SchemaHealError> {
    SchemaRegistry::new(vec![
        TableSpec::new(
            "clients",
            vec![
                ColumnSpec::id("id"),
                col("legal_name", Varchar).not_null(),
                col("entity_type", Varchar),
                col("fiscal_year_end", Varchar),
                col("status", Varchar).not_null().with_default(Text("Prospect")),
                col("owner_name", Varchar),
                col("owner_email", Varchar),
                col("next_follow_up_date", Date),
                col("last_reminder_sent", Date),
                stamp("created_at"),
            ],
        )?,
        TableSpec::new(
            "contacts",
            vec![
                ColumnSpec::id("id"),
                col("client_id", Int).not_null(),
                col("name", Varchar).not_null(),
                col("role", Varchar),
                col("email", Varchar),
                col("phone", Varchar),
            ],
        )?,
        TableSpec::new(
            "services",
            vec![
                ColumnSpec::id("id"),
                col("client_id", Int).not_null(),
                col("service_type", Varchar).not_null().with_default(Text("Other")),
                col("billing_frequency", Varchar),
                col("monthly_fee", DoublePrecision),
                col("active", Boolean).with_default(Bool(true)),
            ],
        )?,
        TableSpec::new(
            "tasks",
            vec![
                ColumnSpec::id("id"),
                col("client_id", Int).not_null(),
                col("title", Varchar).not_null().with_default(Text("Untitled Task")),
                col("due_date", Date),
                col("status", Varchar).not_null().with_default(Text("Open")),
                col("notes", SqlType::Text),
            ],
        )?,
        TableSpec::new(
            "notes",
            vec![
                ColumnSpec::id("id"),
                col("client_id", Int).not_null(),
                col("content", SqlType::Text).not_null().with_default(Text("")),
                stamp("created_at"),
            ],
        )?,
        TableSpec::new(
            "timesheets",
            vec![
                ColumnSpec::id("id"),
                col("client_id", Int).not_null(),
                col("staff_member", Varchar).not_null().with_default(Text("Unknown")),
                col("entry_date", Date).not_null().with_default(CurrentDate),
                col("start_time", Varchar),
                col("end_time", Varchar),
                col("hours", DoublePrecision).not_null().with_default(Integer(0)),
                col("project_task", Varchar),
                col("description", SqlType::Text),
                col("billable", Boolean).with_default(Bool(true)),
                stamp("created_at"),
                stamp("updated_at"),
            ],
        )?,
        TableSpec::new(
            "users",
            vec![
                ColumnSpec::id("id"),
                col("email", Varchar).not_null(),
                col("name", Varchar).not_null(),
                col("hashed_password", Varchar).not_null(),
                col("role", Varchar).not_null().with_default(Text("Staff")),
                col("permissions", SqlType::Text),
                col("active", Boolean).with_default(Bool(true)),
                stamp("created_at"),
                stamp("updated_at"),
            ],
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Planner;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_tables() {
        let names: Vec<&str> = builtin().table_names().collect();
        assert_eq!(
            names,
            vec!["clients", "contacts", "notes", "services", "tasks", "timesheets", "users"]
        );
    }

    #[test]
    fn test_every_defaulted_not_null_column_plans() {
        // Anything NOT NULL with a default must produce a step; anything without
        // one must be refused. No third outcome.
        let planner = Planner::new();
        for table in builtin().tables() {
            for col in table.columns() {
                let planned = planner.plan_column(table.name(), col);
                if col.nullable || col.default.is_some() {
                    assert!(planned.is_ok(), "{}.{} should plan", table.name(), col.name);
                } else {
                    assert!(
                        matches!(planned, Err(SchemaHealError::UnsafeMigration { .. })),
                        "{}.{} should be refused",
                        table.name(),
                        col.name
                    );
                }
            }
        }
    }

    #[test]
    fn test_primary_keys_are_never_planned() {
        let planner = Planner::new();
        for table in builtin().tables() {
            let id = table.column("id").unwrap();
            assert!(id.primary_key);
            assert!(planner.plan_column(table.name(), id).is_err());
        }
    }
}
