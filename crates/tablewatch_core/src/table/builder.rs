//! `CREATE TABLE` statement builder for simple typed tables.
//!
//! Columns are emitted grouped by storage class: integer, then real, then
//! text, each group in declaration order.

use crate::table::SchemaError;
use rusqlite::Connection;

#[derive(Debug, Clone)]
pub struct TableBuilder {
    table_name: String,
    primary_keys: Vec<String>,
    integer_columns: Vec<String>,
    real_columns: Vec<String>,
    text_columns: Vec<String>,
}

impl TableBuilder {
    pub fn create(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            primary_keys: Vec::new(),
            integer_columns: Vec::new(),
            real_columns: Vec::new(),
            text_columns: Vec::new(),
        }
    }

    /// Replaces the primary key column list; duplicates are dropped.
    pub fn primary_key<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys.clear();
        for key in keys {
            push_unique(&mut self.primary_keys, key.into());
        }
        self
    }

    pub fn int_column(mut self, column: impl Into<String>) -> Self {
        push_unique(&mut self.integer_columns, column.into());
        self
    }

    pub fn real_column(mut self, column: impl Into<String>) -> Self {
        push_unique(&mut self.real_columns, column.into());
        self
    }

    pub fn text_column(mut self, column: impl Into<String>) -> Self {
        push_unique(&mut self.text_columns, column.into());
        self
    }

    /// Renders the `CREATE TABLE IF NOT EXISTS` statement.
    ///
    /// # Errors
    /// - Returns `NoColumns` when no column was declared.
    pub fn build_sql(&self) -> Result<String, SchemaError> {
        let columns: Vec<String> = self
            .integer_columns
            .iter()
            .map(|column| format!("{column} INTEGER"))
            .chain(
                self.real_columns
                    .iter()
                    .map(|column| format!("{column} REAL")),
            )
            .chain(
                self.text_columns
                    .iter()
                    .map(|column| format!("{column} TEXT")),
            )
            .collect();

        if columns.is_empty() {
            return Err(SchemaError::NoColumns(self.table_name.clone()));
        }

        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {}({}",
            self.table_name,
            columns.join(", ")
        );
        if !self.primary_keys.is_empty() {
            sql.push_str(", PRIMARY KEY (");
            sql.push_str(&self.primary_keys.join(", "));
            sql.push(')');
        }
        sql.push_str(");");
        Ok(sql)
    }

    /// Builds and executes the statement on `conn`.
    ///
    /// A definition error surfaces as `rusqlite::Error::ToSqlConversionFailure`
    /// wrapping the `SchemaError`, so that it composes with
    /// `TableSchema::on_create` and stays reachable through `source()`.
    pub fn execute(&self, conn: &Connection) -> rusqlite::Result<()> {
        let sql = self.build_sql().map_err(|err| {
            log::error!(
                "event=table_create module=table status=error table={} error={}",
                self.table_name,
                err
            );
            rusqlite::Error::ToSqlConversionFailure(Box::new(err))
        })?;
        conn.execute_batch(&sql)
    }
}

fn push_unique(columns: &mut Vec<String>, column: String) {
    if !columns.contains(&column) {
        columns.push(column);
    }
}

#[cfg(test)]
mod tests {
    use super::TableBuilder;
    use crate::table::SchemaError;
    use rusqlite::Connection;
    use std::error::Error;

    #[test]
    fn groups_columns_by_type_and_appends_primary_key() {
        let sql = TableBuilder::create("TestTable")
            .text_column("text")
            .int_column("id")
            .real_column("rating")
            .primary_key(["id"])
            .build_sql()
            .expect("table should render");

        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS TestTable(id INTEGER, rating REAL, text TEXT, PRIMARY KEY (id));"
        );
    }

    #[test]
    fn deduplicates_columns_and_keys() {
        let sql = TableBuilder::create("pairs")
            .int_column("a")
            .int_column("a")
            .int_column("b")
            .primary_key(["a", "b", "a"])
            .build_sql()
            .expect("table should render");

        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS pairs(a INTEGER, b INTEGER, PRIMARY KEY (a, b));"
        );
    }

    #[test]
    fn text_only_table_without_key() {
        let sql = TableBuilder::create("notes")
            .text_column("body")
            .build_sql()
            .expect("table should render");
        assert_eq!(sql, "CREATE TABLE IF NOT EXISTS notes(body TEXT);");
    }

    #[test]
    fn rejects_table_without_columns() {
        let err = TableBuilder::create("empty")
            .primary_key(["id"])
            .build_sql()
            .expect_err("no columns must fail");
        assert_eq!(err, SchemaError::NoColumns("empty".to_string()));

        let conn = Connection::open_in_memory().expect("memory db should open");
        let err = TableBuilder::create("empty")
            .execute(&conn)
            .expect_err("executing a table without columns must fail");
        let cause = err
            .source()
            .and_then(|source| source.downcast_ref::<SchemaError>());
        assert_eq!(cause, Some(&SchemaError::NoColumns("empty".to_string())));
    }

    #[test]
    fn execute_creates_table_idempotently() {
        let conn = Connection::open_in_memory().expect("memory db should open");
        let builder = TableBuilder::create("items")
            .int_column("id")
            .text_column("name")
            .primary_key(["id"]);

        builder.execute(&conn).expect("first create should succeed");
        builder.execute(&conn).expect("second create should be a no-op");
    }
}
