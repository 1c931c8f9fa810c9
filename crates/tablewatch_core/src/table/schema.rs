//! Table registry used for version calculation and location routing.
//!
//! # Responsibility
//! - Hold every table known to one store, in registration order.
//! - Route a descriptor's storage location to its registered table name.
//!
//! # Invariants
//! - Names and locations are unique within one schema.
//! - Schema version is `max(1, max(last_upgrade_version))`.

use crate::table::{is_valid_identifier, TableDescriptor, TableSchema};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Registration and table definition errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidTableName(String),
    DuplicateTable(String),
    DuplicateLocation(String),
    InvalidUpgradeVersion { table: String, version: u32 },
    NoColumns(String),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTableName(name) => write!(f, "invalid table name `{name}`"),
            Self::DuplicateTable(name) => write!(f, "table already registered: {name}"),
            Self::DuplicateLocation(location) => {
                write!(f, "table location already registered: {location}")
            }
            Self::InvalidUpgradeVersion { table, version } => write!(
                f,
                "table `{table}` has invalid upgrade version {version}; expected >= 1"
            ),
            Self::NoColumns(name) => write!(f, "cannot create table `{name}` with no columns"),
        }
    }
}

impl Error for SchemaError {}

/// Ordered set of registered tables.
#[derive(Default, Clone)]
pub struct Schema {
    tables: Vec<Arc<dyn TableSchema>>,
    by_location: HashMap<String, usize>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tables.iter().map(|table| table.descriptor()))
            .finish()
    }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one table.
    ///
    /// # Errors
    /// - `InvalidTableName` when the name is not a plain identifier.
    /// - `InvalidUpgradeVersion` when `last_upgrade_version` is 0.
    /// - `DuplicateTable` / `DuplicateLocation` on collisions.
    pub fn register(&mut self, table: Arc<dyn TableSchema>) -> Result<(), SchemaError> {
        let descriptor = table.descriptor();
        let name = descriptor.name();
        if !is_valid_identifier(name) {
            return Err(SchemaError::InvalidTableName(name.to_string()));
        }
        if descriptor.last_upgrade_version() == 0 {
            return Err(SchemaError::InvalidUpgradeVersion {
                table: name.to_string(),
                version: 0,
            });
        }
        if self
            .tables
            .iter()
            .any(|existing| existing.descriptor().name() == name)
        {
            return Err(SchemaError::DuplicateTable(name.to_string()));
        }
        if self.by_location.contains_key(descriptor.location()) {
            return Err(SchemaError::DuplicateLocation(
                descriptor.location().to_string(),
            ));
        }

        self.by_location
            .insert(descriptor.location().to_string(), self.tables.len());
        self.tables.push(table);
        Ok(())
    }

    /// Builder-style `register` for schema setup code.
    pub fn with_table(mut self, table: Arc<dyn TableSchema>) -> Result<Self, SchemaError> {
        self.register(table)?;
        Ok(self)
    }

    /// Overall schema version: the highest table upgrade version, at least 1.
    pub fn calculate_version(&self) -> u32 {
        self.tables
            .iter()
            .map(|table| table.descriptor().last_upgrade_version())
            .fold(1, u32::max)
    }

    /// Returns the registered table name stored at `location`.
    pub fn find_table(&self, location: &str) -> Option<&str> {
        self.by_location
            .get(location)
            .and_then(|index| self.tables.get(*index))
            .map(|table| table.descriptor().name())
    }

    /// Resolves a descriptor to its registered table name.
    ///
    /// Returns `None` when the location is unknown or is registered under a
    /// different name.
    pub fn route(&self, descriptor: &TableDescriptor) -> Option<&str> {
        self.find_table(descriptor.location())
            .filter(|name| *name == descriptor.name())
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<dyn TableSchema>> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
