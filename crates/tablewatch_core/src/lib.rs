//! Typed table access over embedded SQLite with change observation.
//!
//! Application code describes tables with [`Table`], filters rows with
//! [`Predicate`] and reads/writes through a [`Store`]. Writes notify observers
//! registered on the affected table; content observers receive freshly
//! requeried rows computed on a background pool.

pub mod config;
pub mod db;
pub mod logging;
pub mod observe;
pub mod query;
pub mod repo;
pub mod runtime;
pub mod service;
pub mod table;

pub use config::{ConfigError, DatabaseLocation, ExecutorConfig, StoreConfig};
pub use db::{DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use observe::{BasicObserver, ContentObserver, SubscriptionId};
pub use query::predicate::{BindValue, Predicate, PredicateError};
pub use repo::{SqliteGateway, StorageGateway};
pub use runtime::{BackgroundExecutor, ExecutorStats, SubmitOutcome};
pub use service::{Store, StoreError, StoreResult};
pub use table::{
    ColumnValues, Schema, SchemaError, Table, TableBuilder, TableDescriptor, TableSchema,
};

/// Minimal health-check API for smoke checks.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
