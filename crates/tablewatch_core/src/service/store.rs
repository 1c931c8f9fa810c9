//! Store facade: typed table access with change notification.
//!
//! # Responsibility
//! - Validate predicates and route tables before any storage call.
//! - Encode/decode rows through each table's codec.
//! - Signal the change registry after every write the engine confirmed.
//!
//! # Invariants
//! - A notification for a write is issued only after the write returned its
//!   affected count, and only when that count is non-zero.
//! - `insert_many` issues at most one notification per batch.
//! - Storage calls are synchronous on the calling thread; only requeries for
//!   content observers run on the background executor.

use crate::config::StoreConfig;
use crate::observe::{BasicObserver, ChangeRegistry, ContentObserver, SubscriptionId};
use crate::query::predicate::Predicate;
use crate::repo::{SqliteGateway, StorageGateway};
use crate::runtime::{BackgroundExecutor, Dispatcher, ExecutorStats};
use crate::service::error::{StoreError, StoreResult};
use crate::table::{Schema, Table, TableSchema};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to one database, its schema and its observer runtime.
///
/// Cloning is cheap; clones share the connection, the executor and the
/// delivery threads.
pub struct Store<G: StorageGateway = SqliteGateway> {
    inner: Arc<StoreInner<G>>,
}

struct StoreInner<G> {
    schema: Schema,
    gateway: Arc<G>,
    registry: ChangeRegistry,
    executor: Arc<BackgroundExecutor>,
    dispatcher: Arc<Dispatcher>,
}

impl<G: StorageGateway> Clone for Store<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Store<SqliteGateway> {
    /// Opens the configured SQLite database and brings `schema` up to date.
    ///
    /// # Errors
    /// - `Config` for an invalid configuration.
    /// - `Storage` when the database cannot be opened or migrated.
    /// - `Runtime` when background threads cannot be spawned.
    pub fn open(config: &StoreConfig, schema: Schema) -> StoreResult<Self> {
        config.validate()?;
        let gateway = SqliteGateway::open(config, &schema)?;
        Self::with_gateway(config, schema, gateway)
    }
}

impl<G: StorageGateway> Store<G> {
    /// Builds a store over an already prepared gateway.
    pub fn with_gateway(config: &StoreConfig, schema: Schema, gateway: G) -> StoreResult<Self> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::spawn(
            &config.dispatcher_thread_name,
            config.delivery_threads,
        )?);
        let executor = Arc::new(BackgroundExecutor::new(&config.executor)?);
        let registry = ChangeRegistry::new(Arc::clone(&dispatcher), Arc::clone(&executor));

        info!(
            "event=store_open module=service status=ok tables={} schema_version={}",
            schema.len(),
            schema.calculate_version()
        );
        Ok(Self {
            inner: Arc::new(StoreInner {
                schema,
                gateway: Arc::new(gateway),
                registry,
                executor,
                dispatcher,
            }),
        })
    }

    /// Returns every row matching `predicate`, decoded by `table`.
    ///
    /// An empty result is `Ok(vec![])`, never an error.
    pub fn query<Tb: Table>(&self, table: &Tb, predicate: &Predicate) -> StoreResult<Vec<Tb::Row>> {
        predicate.validate()?;
        let name = self.route(table)?;
        let rows = self
            .inner
            .gateway
            .query(name, predicate, |row| table.decode(row))?;
        Ok(rows)
    }

    pub fn query_all<Tb: Table>(&self, table: &Tb) -> StoreResult<Vec<Tb::Row>> {
        self.query(table, &Predicate::create())
    }

    /// Returns the first matching row.
    ///
    /// Uses the predicate's own limit when set, otherwise limits to one row.
    pub fn query_single<Tb: Table>(
        &self,
        table: &Tb,
        predicate: &Predicate,
    ) -> StoreResult<Option<Tb::Row>> {
        let rows = self.query(table, &predicate.single_row())?;
        Ok(rows.into_iter().next())
    }

    pub fn query_single_any<Tb: Table>(&self, table: &Tb) -> StoreResult<Option<Tb::Row>> {
        self.query_single(table, &Predicate::create())
    }

    /// Conflict-replace insert of one object.
    ///
    /// Returns the row id of the new or replaced row, or `None` when the
    /// engine reported no write (no notification is sent then).
    pub fn insert<Tb: Table>(&self, table: &Tb, row: &Tb::Row) -> StoreResult<Option<i64>> {
        let name = self.route(table)?;
        let values = table.encode(row);
        let inserted = self.inner.gateway.insert(name, &values)?;
        if inserted.is_some() {
            self.after_write("insert", name, 1);
        }
        Ok(inserted)
    }

    /// Inserts `rows` in one transaction; any failure writes nothing.
    pub fn insert_many<Tb: Table>(&self, table: &Tb, rows: &[Tb::Row]) -> StoreResult<usize> {
        let name = self.route(table)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let encoded: Vec<_> = rows.iter().map(|row| table.encode(row)).collect();
        let written = self.inner.gateway.bulk_insert(name, &encoded)?;
        self.after_write("insert_many", name, written);
        Ok(written)
    }

    /// Writes the encoded `row` into every row matching `predicate`.
    ///
    /// Pagination on `predicate` is ignored.
    pub fn update<Tb: Table>(
        &self,
        table: &Tb,
        predicate: &Predicate,
        row: &Tb::Row,
    ) -> StoreResult<usize> {
        predicate.validate()?;
        let name = self.route(table)?;
        let values = table.encode(row);
        let changed = self.inner.gateway.update(name, &values, predicate)?;
        self.after_write("update", name, changed);
        Ok(changed)
    }

    /// Deletes matching rows; an empty predicate clears the table.
    pub fn delete<Tb: Table>(&self, table: &Tb, predicate: &Predicate) -> StoreResult<usize> {
        predicate.validate()?;
        let name = self.route(table)?;
        let removed = self.inner.gateway.delete(name, predicate)?;
        self.after_write("delete", name, removed);
        Ok(removed)
    }

    pub fn delete_all<Tb: Table>(&self, table: &Tb) -> StoreResult<usize> {
        self.delete(table, &Predicate::create())
    }

    /// Registers `observer` for change signals on `table`.
    pub fn register_basic<Tb, O>(&self, table: &Tb, observer: &Arc<O>) -> StoreResult<SubscriptionId>
    where
        Tb: TableSchema,
        O: BasicObserver + 'static,
    {
        let name = self.route(table)?;
        Ok(self.inner.registry.register_basic(name, observer))
    }

    /// Registers `observer` for rows matching `predicate`, requeried after
    /// every change on `table`.
    ///
    /// The predicate is captured as-is. Requery failures are logged and
    /// produce no delivery.
    pub fn register_content<Tb, O>(
        &self,
        table: Arc<Tb>,
        predicate: Predicate,
        observer: &Arc<O>,
    ) -> StoreResult<SubscriptionId>
    where
        Tb: Table,
        O: ContentObserver<Tb::Row> + 'static,
    {
        predicate.validate()?;
        let name = self.route(table.as_ref())?.to_string();
        let gateway = Arc::clone(&self.inner.gateway);
        let requery_table = name.clone();

        let requery = move || match gateway.query(&requery_table, &predicate, |row| table.decode(row)) {
            Ok(rows) => Some(rows),
            Err(err) => {
                warn!(
                    "event=requery_failed module=service status=error table={} error={}",
                    requery_table, err
                );
                None
            }
        };
        Ok(self.inner.registry.register_content(&name, observer, requery))
    }

    /// Removes a subscription. Unknown handles are ignored.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Signals observers of `table` for a change made outside this store.
    pub fn notify_table_changed<Tb: TableSchema>(&self, table: &Tb) -> StoreResult<usize> {
        let name = self.route(table)?;
        Ok(self.inner.registry.notify_table_changed(name))
    }

    /// Version computed from the registered tables.
    pub fn schema_version(&self) -> u32 {
        self.inner.schema.calculate_version()
    }

    /// Version stored by the engine.
    pub fn stored_schema_version(&self) -> StoreResult<u32> {
        Ok(self.inner.gateway.schema_version()?)
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.inner.executor.stats()
    }

    /// Waits until no observer delivery is queued or running.
    ///
    /// Requeries still running on the executor are not awaited.
    pub fn flush_notifications(&self, timeout: Duration) -> bool {
        self.inner.dispatcher.flush(timeout)
    }

    /// Stops background work for every clone of this store.
    ///
    /// Queued requeries finish and their deliveries run before the delivery
    /// threads exit. Storage calls keep working afterwards but no observer is
    /// notified.
    pub fn shutdown(&self) {
        self.inner.executor.shutdown();
        self.inner.dispatcher.shutdown();
        info!("event=store_shutdown module=service status=ok");
    }

    fn route<Tb: TableSchema + ?Sized>(&self, table: &Tb) -> StoreResult<&str> {
        let descriptor = table.descriptor();
        self.inner
            .schema
            .route(descriptor)
            .ok_or_else(|| StoreError::UnknownTable(descriptor.name().to_string()))
    }

    fn after_write(&self, op: &str, table: &str, affected: usize) {
        debug!("event=store_write module=service status=ok op={op} table={table} affected={affected}");
        if affected > 0 {
            self.inner.registry.notify_table_changed(table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Store;
    use crate::config::StoreConfig;
    use crate::query::predicate::{Predicate, PredicateError};
    use crate::service::error::StoreError;
    use crate::table::{ColumnValues, Schema, Table, TableBuilder, TableDescriptor, TableSchema};
    use rusqlite::{Connection, Row};
    use std::sync::Arc;

    struct Counters {
        descriptor: TableDescriptor,
    }

    impl Counters {
        fn named(name: &str) -> Self {
            Self {
                descriptor: TableDescriptor::new(name),
            }
        }
    }

    impl TableSchema for Counters {
        fn descriptor(&self) -> &TableDescriptor {
            &self.descriptor
        }

        fn on_create(&self, conn: &Connection) -> rusqlite::Result<()> {
            TableBuilder::create(self.descriptor.name())
                .int_column("id")
                .int_column("value")
                .primary_key(["id"])
                .execute(conn)
        }
    }

    impl Table for Counters {
        type Row = (i64, i64);

        fn encode(&self, row: &Self::Row) -> ColumnValues {
            let mut values = ColumnValues::new();
            values.put("id", row.0).put("value", row.1);
            values
        }

        fn decode(&self, row: &Row<'_>) -> rusqlite::Result<Self::Row> {
            Ok((row.get("id")?, row.get("value")?))
        }
    }

    fn store() -> Store {
        let schema = Schema::new()
            .with_table(Arc::new(Counters::named("counters")))
            .expect("counters should register");
        Store::open(&StoreConfig::in_memory(), schema).expect("store should open")
    }

    #[test]
    fn unregistered_table_is_rejected_before_storage() {
        let store = store();
        let err = store
            .insert(&Counters::named("ghosts"), &(1, 1))
            .expect_err("unregistered table must fail");
        assert!(matches!(err, StoreError::UnknownTable(name) if name == "ghosts"));
        store.shutdown();
    }

    #[test]
    fn malformed_predicate_is_rejected() {
        let store = store();
        let predicate = Predicate::create().begin_group().equal_to("id", 1);
        let err = store
            .query(&Counters::named("counters"), &predicate)
            .expect_err("open group must fail");
        assert!(matches!(
            err,
            StoreError::InvalidPredicate(PredicateError::UnbalancedGroups { depth: 1 })
        ));
        store.shutdown();
    }

    #[test]
    fn query_single_returns_first_row_or_none() {
        let store = store();
        let table = Counters::named("counters");
        assert_eq!(
            store.query_single_any(&table).expect("query should succeed"),
            None
        );

        store
            .insert_many(&table, &[(1, 10), (2, 20)])
            .expect("batch should succeed");
        let found = store
            .query_single(&table, &Predicate::create().greater_than("value", 15))
            .expect("query should succeed");
        assert_eq!(found, Some((2, 20)));
        store.shutdown();
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let store = store();
        let written = store
            .insert_many(&Counters::named("counters"), &[])
            .expect("empty batch should succeed");
        assert_eq!(written, 0);
        assert_eq!(store.stored_schema_version().expect("version"), 1);
        store.shutdown();
    }
}
