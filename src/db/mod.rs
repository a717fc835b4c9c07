mod catalog;

pub use catalog::{contains_ident, is_duplicate_column_message, SchemaStore};

use log::info;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use crate::error::SchemaHealError;

/// A single owned SQLite connection.
///
/// A reconciliation run owns exactly one `Database` for its whole duration and
/// drops it (closing the connection) when the run ends. There is no pooling here;
/// sibling processes each bring their own connection.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, SchemaHealError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(SchemaHealError::Error(format!(
                    "Database folder '{}' does not exist or is not a directory",
                    parent.display()
                )));
            }
        }

        let conn = Connection::open(path).map_err(SchemaHealError::DatabaseError)?;
        conn.busy_timeout(busy_timeout)?;
        info!("Database opened at: {}", path.display());

        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, SchemaHealError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
