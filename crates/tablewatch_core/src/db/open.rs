//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by store behavior.
//! - Apply the registered schema before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have every registered table created and upgraded.

use super::versioning::apply_schema;
use super::DbResult;
use crate::config::{DatabaseLocation, StoreConfig};
use crate::table::Schema;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a SQLite database file and applies the schema.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>, schema: &Schema) -> DbResult<Connection> {
    open_logged("file", schema, DEFAULT_BUSY_TIMEOUT, || Connection::open(path))
}

/// Opens an in-memory SQLite database and applies the schema.
pub fn open_db_in_memory(schema: &Schema) -> DbResult<Connection> {
    open_logged("memory", schema, DEFAULT_BUSY_TIMEOUT, Connection::open_in_memory)
}

/// Opens the database described by `config` and applies the schema.
pub fn open_with_config(config: &StoreConfig, schema: &Schema) -> DbResult<Connection> {
    match &config.database {
        DatabaseLocation::Memory => open_logged(
            "memory",
            schema,
            config.busy_timeout(),
            Connection::open_in_memory,
        ),
        DatabaseLocation::File { path } => {
            open_logged("file", schema, config.busy_timeout(), || {
                Connection::open(path)
            })
        }
    }
}

fn open_logged(
    mode: &str,
    schema: &Schema,
    busy_timeout: Duration,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, schema, busy_timeout) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} tables={} duration_ms={}",
                mode,
                schema.len(),
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    schema: &Schema,
    busy_timeout: Duration,
) -> DbResult<()> {
    conn.busy_timeout(busy_timeout)?;
    apply_schema(conn, schema)?;
    Ok(())
}
