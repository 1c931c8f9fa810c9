#![allow(dead_code)]

use rusqlite::{Connection, Row};
use std::sync::Arc;
use tablewatch_core::{
    ColumnValues, Schema, Store, StoreConfig, Table, TableBuilder, TableDescriptor, TableSchema,
};

pub const TEST_TABLE: &str = "TestTable";

#[derive(Debug, Clone, PartialEq)]
pub struct TestObject {
    pub id: i64,
    pub rating: f64,
    pub text: String,
}

impl TestObject {
    pub fn new(id: i64, rating: f64, text: &str) -> Self {
        Self {
            id,
            rating,
            text: text.to_string(),
        }
    }
}

pub struct TestTable {
    descriptor: TableDescriptor,
}

impl TestTable {
    pub fn new() -> Self {
        Self::with_descriptor(TableDescriptor::new(TEST_TABLE))
    }

    pub fn with_descriptor(descriptor: TableDescriptor) -> Self {
        Self { descriptor }
    }
}

impl TableSchema for TestTable {
    fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    fn on_create(&self, conn: &Connection) -> rusqlite::Result<()> {
        TableBuilder::create(self.descriptor.name())
            .int_column("id")
            .real_column("rating")
            .text_column("text")
            .primary_key(["id"])
            .execute(conn)
    }
}

impl Table for TestTable {
    type Row = TestObject;

    fn encode(&self, row: &TestObject) -> ColumnValues {
        let mut values = ColumnValues::new();
        values
            .put("id", row.id)
            .put("rating", row.rating)
            .put("text", row.text.clone());
        values
    }

    fn decode(&self, row: &Row<'_>) -> rusqlite::Result<TestObject> {
        Ok(TestObject {
            id: row.get("id")?,
            rating: row.get("rating")?,
            text: row.get("text")?,
        })
    }
}

pub fn test_schema(table: &Arc<TestTable>) -> Schema {
    Schema::new().with_table(table.clone()).unwrap()
}

/// In-memory store with `TestTable` registered.
pub fn open_store() -> (Store, Arc<TestTable>) {
    let table = Arc::new(TestTable::new());
    let store = Store::open(&StoreConfig::in_memory(), test_schema(&table)).unwrap();
    (store, table)
}
