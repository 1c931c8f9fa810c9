//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `tablewatch_core` linkage and one write/observe/query cycle.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `tablewatch_cli [config.json]`. Set `TABLEWATCH_LOG_DIR` to an
//! absolute path to also write the core log there.

use rusqlite::{Connection, Row};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tablewatch_core::{
    ColumnValues, Predicate, Schema, Store, StoreConfig, Table, TableBuilder, TableDescriptor,
    TableSchema,
};

struct SmokeRows {
    descriptor: TableDescriptor,
}

impl TableSchema for SmokeRows {
    fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    fn on_create(&self, conn: &Connection) -> rusqlite::Result<()> {
        TableBuilder::create(self.descriptor.name())
            .int_column("id")
            .text_column("label")
            .primary_key(["id"])
            .execute(conn)
    }
}

impl Table for SmokeRows {
    type Row = (i64, String);

    fn encode(&self, row: &Self::Row) -> ColumnValues {
        let mut values = ColumnValues::new();
        values.put("id", row.0).put("label", row.1.clone());
        values
    }

    fn decode(&self, row: &Row<'_>) -> rusqlite::Result<Self::Row> {
        Ok((row.get("id")?, row.get("label")?))
    }
}

fn main() -> ExitCode {
    println!("tablewatch_core ping={}", tablewatch_core::ping());
    println!("tablewatch_core version={}", tablewatch_core::core_version());

    if let Ok(log_dir) = std::env::var("TABLEWATCH_LOG_DIR") {
        if let Err(err) =
            tablewatch_core::init_logging(tablewatch_core::default_log_level(), &log_dir)
        {
            eprintln!("logging disabled: {err}");
        }
    }

    match run(std::env::args().nth(1)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("smoke failed: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<String>) -> Result<(), String> {
    let config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .map_err(|err| format!("cannot read `{path}`: {err}"))?;
            StoreConfig::from_json_str(&raw).map_err(|err| err.to_string())?
        }
        None => StoreConfig::in_memory(),
    };

    let smoke_rows = Arc::new(SmokeRows {
        descriptor: TableDescriptor::new("smoke_rows"),
    });
    let schema = Schema::new()
        .with_table(smoke_rows.clone())
        .map_err(|err| err.to_string())?;
    let store = Store::open(&config, schema).map_err(|err| err.to_string())?;

    let signals = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&signals);
    let observer = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let subscription = store
        .register_basic(smoke_rows.as_ref(), &observer)
        .map_err(|err| err.to_string())?;

    store
        .insert(smoke_rows.as_ref(), &(1, "ping".to_string()))
        .map_err(|err| err.to_string())?;
    let rows = store
        .query(smoke_rows.as_ref(), &Predicate::create().equal_to("id", 1))
        .map_err(|err| err.to_string())?;
    let removed = store
        .delete_all(smoke_rows.as_ref())
        .map_err(|err| err.to_string())?;

    store.flush_notifications(Duration::from_secs(2));
    store.unregister(subscription);
    log::info!(
        "event=cli_smoke module=cli status=ok rows={} removed={}",
        rows.len(),
        removed
    );
    println!(
        "tablewatch_core schema_version={} rows={} removed={} signals={}",
        store.schema_version(),
        rows.len(),
        removed,
        signals.load(Ordering::SeqCst)
    );
    store.shutdown();
    Ok(())
}
