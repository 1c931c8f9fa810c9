//! Schema version bootstrap for registered tables.
//!
//! # Responsibility
//! - Create every registered table and upgrade the ones changed since the
//!   stored version.
//! - Record the computed schema version atomically with the table changes.
//!
//! # Invariants
//! - Applied version is mirrored to `PRAGMA user_version`.
//! - A stored version newer than the schema is rejected, never downgraded.

use crate::db::{DbError, DbResult};
use crate::table::Schema;
use log::info;
use rusqlite::Connection;

/// Creates and upgrades registered tables on the provided connection.
///
/// Tables are created with `IF NOT EXISTS` on every call so that tables
/// registered after the first bootstrap appear without a version bump. A
/// table runs `on_upgrade` when its `last_upgrade_version` is newer than the
/// stored version of a previously initialized database.
pub fn apply_schema(conn: &mut Connection, schema: &Schema) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    let target_version = schema.calculate_version();

    if current_version > target_version {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: target_version,
        });
    }

    let tx = conn.transaction()?;
    let mut upgraded = 0_usize;
    for table in schema.tables() {
        let descriptor = table.descriptor();
        if current_version > 0 && descriptor.last_upgrade_version() > current_version {
            table.on_upgrade(&tx)?;
            upgraded += 1;
        } else {
            table.on_create(&tx)?;
        }
    }
    if current_version != target_version {
        tx.execute_batch(&format!("PRAGMA user_version = {target_version};"))?;
    }
    tx.commit()?;

    info!(
        "event=schema_apply module=db status=ok from_version={} to_version={} tables={} upgraded={}",
        current_version,
        target_version,
        schema.len(),
        upgraded
    );
    Ok(())
}

/// Reads the stored schema version.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
