//! Typed table contracts.
//!
//! # Responsibility
//! - Identify logical tables (`TableDescriptor`) and their schema lifecycle.
//! - Define the row codec that bridges domain objects and column values.
//!
//! # Invariants
//! - A table name is a plain SQL identifier; it is validated on registration.
//! - `last_upgrade_version` is at least 1.
//! - Codecs are pure conversions; they never touch the connection.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

pub mod builder;
pub mod schema;

pub use builder::TableBuilder;
pub use schema::{Schema, SchemaError};

static IDENTIFIER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

const LOCATION_SCHEME: &str = "table://";

/// Returns whether `value` can be used verbatim as a table or column name.
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(value))
}

/// Identity and versioning metadata of one logical table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableDescriptor {
    name: String,
    location: String,
    last_upgrade_version: u32,
}

impl TableDescriptor {
    /// Descriptor at version 1 with the default `table://<name>` location.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let location = format!("{LOCATION_SCHEME}{name}");
        Self {
            name,
            location,
            last_upgrade_version: 1,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Sets the schema version in which this table last changed.
    pub fn with_upgrade_version(mut self, version: u32) -> Self {
        self.last_upgrade_version = version;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn last_upgrade_version(&self) -> u32 {
        self.last_upgrade_version
    }
}

/// Schema lifecycle of one table, independent of its row type.
pub trait TableSchema: Send + Sync {
    fn descriptor(&self) -> &TableDescriptor;

    /// Creates the table. Must be idempotent (`IF NOT EXISTS`).
    fn on_create(&self, conn: &Connection) -> rusqlite::Result<()>;

    /// Migrates the table to its `last_upgrade_version`.
    ///
    /// Default behavior drops the table and creates it again.
    fn on_upgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {};",
            self.descriptor().name()
        ))?;
        self.on_create(conn)
    }
}

/// A typed table: schema lifecycle plus the row codec for `Row`.
pub trait Table: TableSchema + 'static {
    type Row: Send + 'static;

    /// Encodes one object into the column values written by insert/update.
    fn encode(&self, row: &Self::Row) -> ColumnValues;

    /// Decodes one result row. The cursor is positioned and readable.
    fn decode(&self, row: &Row<'_>) -> rusqlite::Result<Self::Row>;
}

/// Ordered column name → value map produced by a row codec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnValues {
    entries: Vec<(String, Value)>,
}

impl ColumnValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `column`, replacing an earlier value for the same column.
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::{is_valid_identifier, ColumnValues, TableDescriptor};
    use rusqlite::types::Value;

    #[test]
    fn descriptor_defaults_to_version_one_and_named_location() {
        let descriptor = TableDescriptor::new("users");
        assert_eq!(descriptor.name(), "users");
        assert_eq!(descriptor.location(), "table://users");
        assert_eq!(descriptor.last_upgrade_version(), 1);
    }

    #[test]
    fn identifiers_reject_sql_fragments() {
        assert!(is_valid_identifier("TestTable"));
        assert!(is_valid_identifier("_rows_2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2rows"));
        assert!(!is_valid_identifier("users; DROP TABLE x"));
    }

    #[test]
    fn put_replaces_existing_column_in_place() {
        let mut values = ColumnValues::new();
        values.put("id", 1_i64).put("text", "a".to_string());
        values.put("id", 2_i64);

        assert_eq!(values.len(), 2);
        assert_eq!(values.get("id"), Some(&Value::Integer(2)));
        assert_eq!(values.columns().collect::<Vec<_>>(), vec!["id", "text"]);
    }
}
