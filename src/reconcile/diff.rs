use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::Serialize;

use super::registry::{SchemaRegistry, TableSpec};
use crate::db::{contains_ident, SchemaStore};
use crate::error::SchemaHealError;

/// Live `table -> columns` as observed at the start of one run.
///
/// Only tables the registry declares are read. Never reused across runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CatalogSnapshot {
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl CatalogSnapshot {
    pub fn read(
        store: &dyn SchemaStore,
        registry: &SchemaRegistry,
    ) -> Result<Self, SchemaHealError> {
        let present = store.table_names()?;

        let mut tables = BTreeMap::new();
        for name in registry.table_names() {
            if contains_ident(&present, name) {
                tables.insert(name.to_string(), store.column_names(name)?);
            }
        }

        Ok(Self { tables })
    }

    pub fn from_tables(tables: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { tables }
    }

    pub fn columns(&self, table: &str) -> Option<&BTreeSet<String>> {
        self.tables.get(table)
    }
}

/// Drift for a single table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DriftEntry {
    pub missing_in_db: BTreeSet<String>,
    pub extra_in_db: BTreeSet<String>,
    pub table_missing: bool,
}

impl DriftEntry {
    pub fn is_clean(&self) -> bool {
        !self.table_missing && self.missing_in_db.is_empty()
    }
}

pub fn diff(table_name: &str, expected: &TableSpec, snapshot: &CatalogSnapshot) -> DriftEntry {
    let expected_cols = expected.column_names();

    let Some(actual) = snapshot.columns(table_name) else {
        debug!("Diff '{}': table missing", table_name);
        return DriftEntry {
            missing_in_db: expected_cols,
            extra_in_db: BTreeSet::new(),
            table_missing: true,
        };
    };

    let entry = DriftEntry {
        missing_in_db: expected_cols
            .iter()
            .filter(|col| !contains_ident(actual, col))
            .cloned()
            .collect(),
        extra_in_db: actual
            .iter()
            .filter(|col| !contains_ident(&expected_cols, col))
            .cloned()
            .collect(),
        table_missing: false,
    };

    debug!(
        "Diff '{}': {} missing, {} extra",
        table_name,
        entry.missing_in_db.len(),
        entry.extra_in_db.len()
    );

    entry
}

/// Diff every registry table, in table-name order.
pub fn diff_all(
    registry: &SchemaRegistry,
    snapshot: &CatalogSnapshot,
) -> BTreeMap<String, DriftEntry> {
    registry
        .tables()
        .map(|spec| (spec.name().to_string(), diff(spec.name(), spec, snapshot)))
        .collect()
}
