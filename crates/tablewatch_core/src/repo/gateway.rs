//! Storage gateway contract and SQLite implementation.
//!
//! # Responsibility
//! - Turn a table name, a `Predicate` and column values into parameterized
//!   SELECT/INSERT/UPDATE/DELETE statements.
//! - Keep SQL text and statement execution inside the persistence boundary.
//!
//! # Invariants
//! - Bind values are always passed as parameters, never spliced into SQL.
//! - Inserts use conflict-replace: a row with the same primary key is fully
//!   replaced.
//! - A bulk insert is one engine transaction: every row is written or none.
//! - Pagination applies to SELECT only.

use crate::config::StoreConfig;
use crate::db::{open_with_config, versioning, DbResult};
use crate::query::predicate::Predicate;
use crate::table::{is_valid_identifier, ColumnValues, Schema};
use log::debug;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};

/// Statement-level access to the underlying engine.
///
/// Table names passed in are already routed against the schema. Callers own
/// predicate validation.
pub trait StorageGateway: Send + Sync + 'static {
    /// Runs a SELECT and decodes every returned row.
    fn query<T, F>(&self, table: &str, predicate: &Predicate, decode: F) -> DbResult<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>;

    /// Conflict-replace insert of one row.
    ///
    /// Returns the row id when the engine confirmed a write.
    fn insert(&self, table: &str, values: &ColumnValues) -> DbResult<Option<i64>>;

    /// Inserts every row in one transaction and returns the written count.
    fn bulk_insert(&self, table: &str, rows: &[ColumnValues]) -> DbResult<usize>;

    /// Updates matching rows and returns the affected count.
    fn update(&self, table: &str, values: &ColumnValues, predicate: &Predicate)
        -> DbResult<usize>;

    /// Deletes matching rows and returns the affected count.
    fn delete(&self, table: &str, predicate: &Predicate) -> DbResult<usize>;

    /// Schema version currently stored by the engine.
    fn schema_version(&self) -> DbResult<u32>;
}

/// SQLite-backed gateway over a single serialized connection.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
}

impl SqliteGateway {
    /// Opens the configured database and applies `schema` before returning.
    pub fn open(config: &StoreConfig, schema: &Schema) -> DbResult<Self> {
        let conn = open_with_config(config, schema)?;
        Ok(Self::from_connection(conn))
    }

    /// Wraps a connection that already carries the schema.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl StorageGateway for SqliteGateway {
    fn query<T, F>(&self, table: &str, predicate: &Predicate, mut decode: F) -> DbResult<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let sql = select_sql(table, predicate);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind_params(predicate)), |row| decode(row))?
            .collect::<rusqlite::Result<Vec<T>>>()?;
        Ok(rows)
    }

    fn insert(&self, table: &str, values: &ColumnValues) -> DbResult<Option<i64>> {
        let conn = self.conn.lock();
        let changed = insert_row(&conn, table, values)?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(Some(conn.last_insert_rowid()))
    }

    fn bulk_insert(&self, table: &str, rows: &[ColumnValues]) -> DbResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut written = 0_usize;
        for row in rows {
            if insert_row(&tx, table, row)? > 0 {
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn update(
        &self,
        table: &str,
        values: &ColumnValues,
        predicate: &Predicate,
    ) -> DbResult<usize> {
        if values.is_empty() {
            debug!("event=store_update module=repo status=skipped table={table} reason=no_columns");
            return Ok(0);
        }
        let assignments = values
            .columns()
            .map(|column| checked_column(column).map(|column| format!("{column} = ?")))
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
        push_where(&mut sql, predicate);

        let params: Vec<Value> = values
            .values()
            .cloned()
            .chain(bind_params(predicate))
            .collect();
        let conn = self.conn.lock();
        let changed = conn.execute(&sql, params_from_iter(params))?;
        Ok(changed)
    }

    fn delete(&self, table: &str, predicate: &Predicate) -> DbResult<usize> {
        let mut sql = format!("DELETE FROM {table}");
        push_where(&mut sql, predicate);

        let conn = self.conn.lock();
        let changed = conn.execute(&sql, params_from_iter(bind_params(predicate)))?;
        Ok(changed)
    }

    fn schema_version(&self) -> DbResult<u32> {
        let conn = self.conn.lock();
        versioning::current_user_version(&conn)
    }
}

fn insert_row(conn: &Connection, table: &str, values: &ColumnValues) -> rusqlite::Result<usize> {
    let sql = insert_sql(table, values)?;
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.execute(params_from_iter(values.values()))
}

fn insert_sql(table: &str, values: &ColumnValues) -> rusqlite::Result<String> {
    if values.is_empty() {
        return Ok(format!("INSERT OR REPLACE INTO {table} DEFAULT VALUES"));
    }
    let columns = values
        .columns()
        .map(checked_column)
        .collect::<rusqlite::Result<Vec<&str>>>()?;
    let placeholders = vec!["?"; columns.len()].join(", ");
    Ok(format!(
        "INSERT OR REPLACE INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    ))
}

fn select_sql(table: &str, predicate: &Predicate) -> String {
    let mut sql = format!("SELECT * FROM {table}");
    push_where(&mut sql, predicate);
    // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
    if predicate.row_limit().is_none() && predicate.row_offset().is_some() {
        sql.push_str(" LIMIT -1");
    }
    if let Some(suffix) = predicate.limit_clause() {
        sql.push_str(&suffix);
    }
    sql
}

fn push_where(sql: &mut String, predicate: &Predicate) {
    if let Some(clause) = predicate.where_clause() {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
}

fn bind_params(predicate: &Predicate) -> impl Iterator<Item = Value> + '_ {
    predicate.values().iter().map(Value::from)
}

fn checked_column(column: &str) -> rusqlite::Result<&str> {
    if is_valid_identifier(column) {
        Ok(column)
    } else {
        Err(rusqlite::Error::InvalidColumnName(column.to_string()))
    }
}
