use std::collections::BTreeSet;

use log::trace;

use super::Database;
use crate::error::SchemaHealError;

/// The seam between the reconciliation engine and a live database.
///
/// Implementations must answer every call with a fresh catalog query. Callers
/// rely on observing the effect of their own (and other processes') DDL between
/// calls, so nothing here may be memoized.
pub trait SchemaStore {
    /// All user tables currently present.
    fn table_names(&self) -> Result<BTreeSet<String>, SchemaHealError>;

    /// Columns currently present on `table`. Empty if the table does not exist.
    fn column_names(&self, table: &str) -> Result<BTreeSet<String>, SchemaHealError>;

    /// Execute a single DDL statement, committed on its own.
    fn execute_ddl(&self, sql: &str) -> Result<(), SchemaHealError>;
}

const TABLE_NAMES_SQL: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'";

const COLUMN_NAMES_SQL: &str = "SELECT name FROM pragma_table_info(?1)";

impl SchemaStore for Database {
    fn table_names(&self) -> Result<BTreeSet<String>, SchemaHealError> {
        trace!("Catalog query: table names");
        let mut stmt = self
            .conn()
            .prepare(TABLE_NAMES_SQL)
            .map_err(catalog_unavailable)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(catalog_unavailable)?;

        let mut names = BTreeSet::new();
        for name in rows {
            names.insert(name.map_err(catalog_unavailable)?);
        }
        Ok(names)
    }

    fn column_names(&self, table: &str) -> Result<BTreeSet<String>, SchemaHealError> {
        trace!("Catalog query: columns of '{}'", table);
        let mut stmt = self
            .conn()
            .prepare(COLUMN_NAMES_SQL)
            .map_err(catalog_unavailable)?;
        let rows = stmt
            .query_map([table], |row| row.get::<_, String>(0))
            .map_err(catalog_unavailable)?;

        let mut names = BTreeSet::new();
        for name in rows {
            names.insert(name.map_err(catalog_unavailable)?);
        }
        Ok(names)
    }

    fn execute_ddl(&self, sql: &str) -> Result<(), SchemaHealError> {
        self.conn().execute(sql, [])?;
        Ok(())
    }
}

fn catalog_unavailable(e: rusqlite::Error) -> SchemaHealError {
    SchemaHealError::CatalogUnavailable(e.to_string())
}

/// SQLite identifiers are case-insensitive: `Status` and `status` name the
/// same column, and `ADD COLUMN status` fails if `Status` exists.
pub fn contains_ident(names: &BTreeSet<String>, ident: &str) -> bool {
    names.iter().any(|name| name.eq_ignore_ascii_case(ident))
}

/// Fallback classification of a failed `ADD COLUMN` as a lost race.
///
/// The executor asks the catalog first; this only matters when the catalog
/// cannot be read back after the failure.
pub fn is_duplicate_column_message(err: &SchemaHealError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("duplicate column") || msg.contains("already exists")
}
