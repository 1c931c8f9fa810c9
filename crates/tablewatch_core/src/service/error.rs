use crate::config::ConfigError;
use crate::db::DbError;
use crate::query::predicate::PredicateError;
use crate::table::SchemaError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Error surfaced by `Store` operations.
#[derive(Debug)]
pub enum StoreError {
    /// The table is not registered in the store schema.
    UnknownTable(String),
    /// Malformed predicate; nothing reached storage.
    InvalidPredicate(PredicateError),
    /// Engine or I/O failure, propagated unchanged.
    Storage(DbError),
    Schema(SchemaError),
    Config(ConfigError),
    /// Background runtime threads could not be started.
    Runtime(std::io::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTable(name) => write!(f, "unknown table: {name}"),
            Self::InvalidPredicate(err) => write!(f, "invalid predicate: {err}"),
            Self::Storage(err) => write!(f, "storage failure: {err}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Runtime(err) => write!(f, "runtime start failed: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownTable(_) => None,
            Self::InvalidPredicate(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Runtime(err) => Some(err),
        }
    }
}

impl From<PredicateError> for StoreError {
    fn from(value: PredicateError) -> Self {
        Self::InvalidPredicate(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Storage(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(value))
    }
}

impl From<SchemaError> for StoreError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Runtime(value)
    }
}
