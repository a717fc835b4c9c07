use log::info;

use crate::db::{Database, SchemaStore};
use crate::error::SchemaHealError;
use crate::reconcile::{SchemaRegistry, TableSpec};

/// `CREATE TABLE IF NOT EXISTS` for a brand-new table.
///
/// Unlike `ADD COLUMN`, SQLite accepts `CURRENT_DATE`/`CURRENT_TIMESTAMP`
/// defaults here, so defaults are emitted as declared.
pub fn create_table_sql(spec: &TableSpec) -> String {
    let columns: Vec<String> = spec
        .columns()
        .iter()
        .map(|col| {
            let mut def = format!("    {} {}", col.name, col.sql_type.type_clause());
            if col.primary_key {
                def.push_str(" PRIMARY KEY");
            } else if !col.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(expr) = &col.default {
                def.push_str(" DEFAULT ");
                def.push_str(&expr.to_sql());
            }
            def
        })
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        spec.name(),
        columns.join(",\n")
    )
}

/// Create every registry table that is absent. Existing tables are left
/// alone; their columns are the reconciler's business.
///
/// Returns the names of the tables created.
pub fn create_missing_tables(
    db: &Database,
    registry: &SchemaRegistry,
) -> Result<Vec<String>, SchemaHealError> {
    let present = db.table_names()?;
    let mut created = Vec::new();

    for spec in registry.tables() {
        if present.contains(spec.name()) {
            continue;
        }
        db.execute_ddl(&create_table_sql(spec))?;
        info!("Created table '{}'", spec.name());
        created.push(spec.name().to_string());
    }

    Ok(created)
}
