use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaHealError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into SchemaHealError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Invalid schema declaration: {0}")]
    InvalidSchema(String),

    #[error(
        "Unsafe migration for '{table}.{column}': NOT NULL column has no default; add it manually"
    )]
    UnsafeMigration { table: String, column: String },

    #[error("Failed to add '{table}.{column}': {reason}")]
    DdlExecutionFailed {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Column '{table}.{column}' still missing after ALTER TABLE")]
    VerificationFailed { table: String, column: String },
}

impl SchemaHealError {
    /// Column a per-column failure refers to.
    pub fn column(&self) -> Option<&str> {
        match self {
            SchemaHealError::UnsafeMigration { column, .. }
            | SchemaHealError::DdlExecutionFailed { column, .. }
            | SchemaHealError::VerificationFailed { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Short label used in report lines, e.g. `hours (DDL failed: ...)`
    pub fn report_reason(&self) -> String {
        match self {
            SchemaHealError::UnsafeMigration { .. } => {
                "unsafe migration: NOT NULL column has no default, manual intervention required"
                    .to_string()
            }
            SchemaHealError::DdlExecutionFailed { reason, .. } => {
                format!("DDL failed: {}", reason)
            }
            SchemaHealError::VerificationFailed { .. } => {
                "verification failed: column absent after ALTER TABLE".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_migration_display() {
        let err = SchemaHealError::UnsafeMigration {
            table: "tasks".into(),
            column: "client_id".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unsafe migration for 'tasks.client_id': NOT NULL column has no default; add it manually"
        );
        assert_eq!(
            err.report_reason(),
            "unsafe migration: NOT NULL column has no default, manual intervention required"
        );
    }

    #[test]
    fn test_ddl_failure_reason() {
        let err = SchemaHealError::DdlExecutionFailed {
            table: "a".into(),
            column: "x".into(),
            reason: "permission denied".into(),
        };
        assert_eq!(err.report_reason(), "DDL failed: permission denied");
    }

    #[test]
    fn test_rusqlite_conversion() {
        let err: SchemaHealError = RusqliteError::InvalidQuery.into();
        assert!(matches!(err, SchemaHealError::DatabaseError(_)));
    }
}
