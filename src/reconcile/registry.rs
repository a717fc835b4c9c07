use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use strum::{Display, EnumIter};

use crate::error::SchemaHealError;

/// Semantic column type, independent of how the target engine spells it.
#[derive(Clone, Copy, Debug, Display, EnumIter, PartialEq, Eq, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum SqlType {
    Integer,
    Varchar,
    Text,
    Boolean,
    Date,
    TimestampTz,
    DoublePrecision,
}

impl SqlType {
    /// SQLite type name. Chosen so that affinity matches the semantic type.
    pub fn type_clause(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Varchar => "VARCHAR",
            SqlType::Text => "TEXT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Date => "DATE",
            SqlType::TimestampTz => "TIMESTAMP",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
        }
    }
}

/// Declared default for a column.
///
/// Closed set on purpose: every variant renders to SQL without ever touching
/// text that came from outside the registry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DefaultExpr {
    Text(&'static str),
    Integer(i64),
    Real(f64),
    Bool(bool),
    CurrentDate,
    CurrentTimestamp,
}

impl DefaultExpr {
    pub fn is_constant(&self) -> bool {
        !matches!(self, DefaultExpr::CurrentDate | DefaultExpr::CurrentTimestamp)
    }

    /// SQL spelling as written in `CREATE TABLE`. Non-constant expressions are
    /// emitted as keywords here; `ADD COLUMN` goes through the planner instead.
    pub fn to_sql(&self) -> String {
        match self {
            DefaultExpr::Text(s) => quote_literal(s),
            DefaultExpr::Integer(i) => i.to_string(),
            DefaultExpr::Real(f) => f.to_string(),
            DefaultExpr::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            DefaultExpr::CurrentDate => "CURRENT_DATE".to_string(),
            DefaultExpr::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

pub(crate) fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub default: Option<DefaultExpr>,
    pub primary_key: bool,
}

impl ColumnSpec {
    /// A nullable column with no default.
    pub fn new(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    /// `INTEGER PRIMARY KEY`
    pub fn id(name: &str) -> Self {
        Self {
            primary_key: true,
            nullable: false,
            ..Self::new(name, SqlType::Integer)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, expr: DefaultExpr) -> Self {
        self.default = Some(expr);
        self
    }
}

/// Expected shape of one table. Columns keep declaration order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableSpec {
    name: String,
    columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(name: &str, columns: Vec<ColumnSpec>) -> Result<Self, SchemaHealError> {
        ensure_identifier(name)?;

        let mut seen = BTreeSet::new();
        for col in &columns {
            ensure_identifier(&col.name)?;
            if !seen.insert(col.name.to_ascii_lowercase()) {
                return Err(SchemaHealError::InvalidSchema(format!(
                    "column '{}' declared twice in table '{}'",
                    col.name, name
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> BTreeSet<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Identifiers end up spliced into DDL text, so they must be plain.
fn ensure_identifier(ident: &str) -> Result<(), SchemaHealError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(SchemaHealError::InvalidSchema(format!(
            "'{}' is not a plain SQL identifier",
            ident
        )))
    }
}

/// Read-only lookup from table name to its expected shape.
///
/// Iteration is always in table-name order so reports and logs are reproducible.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableSpec>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableSpec>) -> Result<Self, SchemaHealError> {
        let mut map: BTreeMap<String, TableSpec> = BTreeMap::new();
        for table in tables {
            if map
                .keys()
                .any(|name| name.eq_ignore_ascii_case(table.name()))
            {
                return Err(SchemaHealError::InvalidSchema(format!(
                    "table '{}' declared twice",
                    table.name()
                )));
            }
            map.insert(table.name().to_string(), table);
        }
        Ok(Self { tables: map })
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_type_clause_covers_all_types() {
        for t in SqlType::iter() {
            assert!(!t.type_clause().is_empty(), "{t} has no type clause");
        }
        assert_eq!(SqlType::DoublePrecision.type_clause(), "DOUBLE PRECISION");
        assert_eq!(SqlType::TimestampTz.to_string(), "timestamp_tz");
    }

    #[test]
    fn test_default_rendering() {
        assert_eq!(DefaultExpr::Text("Open").to_sql(), "'Open'");
        assert_eq!(DefaultExpr::Text("O'Brien").to_sql(), "'O''Brien'");
        assert_eq!(DefaultExpr::Text("").to_sql(), "''");
        assert_eq!(DefaultExpr::Integer(0).to_sql(), "0");
        assert_eq!(DefaultExpr::Real(1.5).to_sql(), "1.5");
        assert_eq!(DefaultExpr::Bool(true).to_sql(), "1");
        assert_eq!(DefaultExpr::Bool(false).to_sql(), "0");
        assert_eq!(DefaultExpr::CurrentDate.to_sql(), "CURRENT_DATE");
        assert!(!DefaultExpr::CurrentTimestamp.is_constant());
        assert!(DefaultExpr::Integer(3).is_constant());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let result = TableSpec::new(
            "tasks",
            vec![
                ColumnSpec::id("id"),
                ColumnSpec::new("title", SqlType::Varchar),
                ColumnSpec::new("title", SqlType::Text),
            ],
        );
        assert!(matches!(result, Err(SchemaHealError::InvalidSchema(_))));
    }

    #[test]
    fn test_names_differing_only_in_case_are_duplicates() {
        let result = TableSpec::new(
            "tasks",
            vec![
                ColumnSpec::new("status", SqlType::Varchar),
                ColumnSpec::new("Status", SqlType::Varchar),
            ],
        );
        assert!(matches!(result, Err(SchemaHealError::InvalidSchema(_))));

        let result = SchemaRegistry::new(vec![
            TableSpec::new("notes", vec![]).unwrap(),
            TableSpec::new("Notes", vec![]).unwrap(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_identifier_rejected() {
        assert!(TableSpec::new("tasks; DROP TABLE x", vec![]).is_err());
        assert!(TableSpec::new("tasks", vec![ColumnSpec::new("1col", SqlType::Text)]).is_err());
        assert!(TableSpec::new("tasks", vec![ColumnSpec::new("", SqlType::Text)]).is_err());
        assert!(TableSpec::new("_tasks2", vec![ColumnSpec::new("a_b", SqlType::Text)]).is_ok());
    }

    #[test]
    fn test_registry_iterates_sorted() {
        let registry = SchemaRegistry::new(vec![
            TableSpec::new("users", vec![]).unwrap(),
            TableSpec::new("clients", vec![]).unwrap(),
            TableSpec::new("notes", vec![]).unwrap(),
        ])
        .unwrap();
        let names: Vec<&str> = registry.table_names().collect();
        assert_eq!(names, vec!["clients", "notes", "users"]);
    }

    #[test]
    fn test_registry_rejects_duplicate_table() {
        let result = SchemaRegistry::new(vec![
            TableSpec::new("a", vec![]).unwrap(),
            TableSpec::new("a", vec![]).unwrap(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_column_builders() {
        let id = ColumnSpec::id("id");
        assert!(id.primary_key);
        assert!(!id.nullable);
        assert!(id.default.is_none());

        let status = ColumnSpec::new("status", SqlType::Varchar)
            .not_null()
            .with_default(DefaultExpr::Text("Open"));
        assert!(!status.nullable);
        assert_eq!(status.default, Some(DefaultExpr::Text("Open")));
    }
}
