//! Per-table observer registry and change fan-out.
//!
//! # Responsibility
//! - Track active subscriptions by handle, each bound to one table.
//! - Turn one "table changed" signal into independent deliveries: basic
//!   observers are posted straight to their delivery lane, content observers
//!   get a background requery whose result is posted to their lane.
//! - Prune subscriptions whose observer was dropped without `unregister`.
//!
//! # Invariants
//! - The subscription map is only touched under its lock, and hooks are
//!   invoked after the lock is released.
//! - The registry never keeps an observer alive: it holds a `Weak` reference.
//!   A dropped observer receives nothing more, its subscription is removed on
//!   the next signal for its table, and no requery runs on its behalf.
//! - After `unregister` returns, no further callback runs for that handle,
//!   including results of requeries already in flight.
//! - Content deliveries for one subscription never regress: a requery result
//!   older than one already delivered is dropped.

use crate::runtime::{BackgroundExecutor, DeliveryLane, Dispatcher};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Subscriber interested only in "something changed".
pub trait BasicObserver: Send + Sync {
    fn on_table_changed(&self);
}

impl<F> BasicObserver for F
where
    F: Fn() + Send + Sync,
{
    fn on_table_changed(&self) {
        self()
    }
}

/// Subscriber that receives the requeried rows after each change.
pub trait ContentObserver<T>: Send + Sync {
    fn on_table_changed(&self, rows: Vec<T>);
}

impl<T, F> ContentObserver<T> for F
where
    F: Fn(Vec<T>) + Send + Sync,
{
    fn on_table_changed(&self, rows: Vec<T>) {
        self(rows)
    }
}

/// Opaque handle returned at registration and used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Basic,
    Content,
}

impl SubscriptionKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Content => "content",
        }
    }
}

type ChangeHook = Arc<dyn Fn() + Send + Sync>;
type LivenessCheck = Box<dyn Fn() -> bool + Send + Sync>;

struct Subscription {
    table: String,
    kind: SubscriptionKind,
    active: Arc<AtomicBool>,
    is_alive: LivenessCheck,
    on_change: ChangeHook,
}

/// Sequence bookkeeping for one content subscription.
#[derive(Default)]
struct DeliveryOrder {
    issued: AtomicU64,
    delivered: AtomicU64,
}

/// Registry of table subscriptions.
pub struct ChangeRegistry {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    dispatcher: Arc<Dispatcher>,
    executor: Arc<BackgroundExecutor>,
}

impl ChangeRegistry {
    pub fn new(dispatcher: Arc<Dispatcher>, executor: Arc<BackgroundExecutor>) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            dispatcher,
            executor,
        }
    }

    /// Subscribes `observer` to change signals for `table`.
    ///
    /// No delivery happens until the first change after registration.
    pub fn register_basic<O>(&self, table: &str, observer: &Arc<O>) -> SubscriptionId
    where
        O: BasicObserver + 'static,
    {
        let observer: Weak<O> = Arc::downgrade(observer);
        let is_alive = liveness(&observer);
        let active = Arc::new(AtomicBool::new(true));
        let lane = self.dispatcher.lane();
        let hook_active = Arc::clone(&active);
        let hook_table = table.to_string();

        let on_change: ChangeHook = Arc::new(move || {
            let observer = observer.clone();
            let active = Arc::clone(&hook_active);
            let table = hook_table.clone();
            lane.post(move || {
                if !active.load(Ordering::Acquire) {
                    log_dropped(&table, "unregistered");
                    return;
                }
                match observer.upgrade() {
                    Some(observer) => observer.on_table_changed(),
                    None => log_dropped(&table, "observer_dropped"),
                }
            });
        });

        self.insert(table, SubscriptionKind::Basic, active, is_alive, on_change)
    }

    /// Subscribes `observer` to requeried rows for `table`.
    ///
    /// Every change runs `requery` on the background executor and posts its
    /// result to this subscription's delivery lane. `requery` returns `None`
    /// when the query failed; the failure is expected to be logged by the
    /// caller and produces no delivery.
    pub fn register_content<T, O, Q>(&self, table: &str, observer: &Arc<O>, requery: Q) -> SubscriptionId
    where
        T: Send + 'static,
        O: ContentObserver<T> + 'static,
        Q: Fn() -> Option<Vec<T>> + Send + Sync + 'static,
    {
        let observer: Weak<O> = Arc::downgrade(observer);
        let is_alive = liveness(&observer);
        let requery = Arc::new(requery);
        let active = Arc::new(AtomicBool::new(true));
        let order = Arc::new(DeliveryOrder::default());
        let lane = self.dispatcher.lane();
        let executor = Arc::clone(&self.executor);
        let hook_active = Arc::clone(&active);
        let hook_table = table.to_string();

        let on_change: ChangeHook = Arc::new(move || {
            let sequence = order.issued.fetch_add(1, Ordering::AcqRel) + 1;
            let requery = Arc::clone(&requery);
            let observer = observer.clone();
            let active = Arc::clone(&hook_active);
            let order = Arc::clone(&order);
            let lane = lane.clone();
            let table = hook_table.clone();

            executor.submit(move || {
                if !active.load(Ordering::Acquire) {
                    log_dropped(&table, "unregistered");
                    return;
                }
                if observer.strong_count() == 0 {
                    log_dropped(&table, "observer_dropped");
                    return;
                }
                let Some(rows) = requery() else {
                    return;
                };
                post_content(&lane, &table, sequence, rows, observer, active, order);
            });
        });

        self.insert(table, SubscriptionKind::Content, active, is_alive, on_change)
    }

    /// Removes a subscription. Unknown handles are a no-op.
    ///
    /// Returns whether a subscription was removed.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.lock().remove(&id);
        match removed {
            Some(subscription) => {
                subscription.active.store(false, Ordering::Release);
                info!(
                    "event=observer_unregister module=observe status=ok kind={} table={} subscription={}",
                    subscription.kind.as_str(),
                    subscription.table,
                    id
                );
                true
            }
            None => false,
        }
    }

    /// Fans a change on `table` out to every live subscription on it.
    ///
    /// Subscriptions on `table` whose observer was dropped are removed first.
    /// Returns the number of subscriptions signalled.
    pub fn notify_table_changed(&self, table: &str) -> usize {
        let hooks: Vec<ChangeHook> = {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions.retain(|id, subscription| {
                if subscription.table != table || (subscription.is_alive)() {
                    return true;
                }
                subscription.active.store(false, Ordering::Release);
                info!(
                    "event=observer_pruned module=observe status=ok kind={} table={} subscription={}",
                    subscription.kind.as_str(),
                    subscription.table,
                    id
                );
                false
            });
            subscriptions
                .values()
                .filter(|subscription| subscription.table == table)
                .map(|subscription| Arc::clone(&subscription.on_change))
                .collect()
        };

        for hook in &hooks {
            hook();
        }
        debug!(
            "event=table_changed module=observe status=ok table={} subscriptions={}",
            table,
            hooks.len()
        );
        hooks.len()
    }

    pub fn subscription_count(&self, table: &str) -> usize {
        self.subscriptions
            .lock()
            .values()
            .filter(|subscription| subscription.table == table)
            .count()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }

    fn insert(
        &self,
        table: &str,
        kind: SubscriptionKind,
        active: Arc<AtomicBool>,
        is_alive: LivenessCheck,
        on_change: ChangeHook,
    ) -> SubscriptionId {
        let id = SubscriptionId::generate();
        self.subscriptions.lock().insert(
            id,
            Subscription {
                table: table.to_string(),
                kind,
                active,
                is_alive,
                on_change,
            },
        );
        info!(
            "event=observer_register module=observe status=ok kind={} table={} subscription={}",
            kind.as_str(),
            table,
            id
        );
        id
    }
}

fn liveness<O: ?Sized + Send + Sync + 'static>(observer: &Weak<O>) -> LivenessCheck {
    let observer = observer.clone();
    Box::new(move || observer.strong_count() > 0)
}

fn post_content<T, O>(
    lane: &DeliveryLane,
    table: &str,
    sequence: u64,
    rows: Vec<T>,
    observer: Weak<O>,
    active: Arc<AtomicBool>,
    order: Arc<DeliveryOrder>,
) where
    T: Send + 'static,
    O: ContentObserver<T> + 'static,
{
    let table = table.to_string();
    lane.post(move || {
        deliver_content(&table, sequence, rows, &observer, &active, &order);
    });
}

fn deliver_content<T, O>(
    table: &str,
    sequence: u64,
    rows: Vec<T>,
    observer: &Weak<O>,
    active: &AtomicBool,
    order: &DeliveryOrder,
) where
    O: ContentObserver<T>,
{
    if !active.load(Ordering::Acquire) {
        log_dropped(table, "unregistered");
        return;
    }
    // A lane runs one job at a time, so load-then-store is safe.
    if sequence <= order.delivered.load(Ordering::Acquire) {
        log_dropped(table, "stale");
        return;
    }
    order.delivered.store(sequence, Ordering::Release);

    match observer.upgrade() {
        Some(observer) => observer.on_table_changed(rows),
        None => log_dropped(table, "observer_dropped"),
    }
}

fn log_dropped(table: &str, reason: &str) {
    debug!("event=delivery_dropped module=observe status=skipped table={table} reason={reason}");
}

#[cfg(test)]
mod tests {
    use super::ChangeRegistry;
    use crate::config::ExecutorConfig;
    use crate::runtime::{BackgroundExecutor, Dispatcher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::{Duration, Instant};

    fn registry() -> ChangeRegistry {
        let dispatcher = Dispatcher::spawn("registry-test", 2).expect("dispatcher should start");
        let executor =
            BackgroundExecutor::new(&ExecutorConfig::default()).expect("executor should start");
        ChangeRegistry::new(Arc::new(dispatcher), Arc::new(executor))
    }

    #[test]
    fn basic_observer_is_signalled_only_for_its_table() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let observer = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.register_basic("users", &observer);
        assert_eq!(registry.notify_table_changed("users"), 1);
        assert_eq!(registry.notify_table_changed("orders"), 0);
        assert!(registry.dispatcher.flush(Duration::from_secs(2)));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_unknown_handle_is_noop_and_known_handle_stops_delivery() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let observer = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = registry.register_basic("users", &observer);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));

        registry.notify_table_changed("users");
        assert!(registry.dispatcher.flush(Duration::from_secs(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_observer_is_not_kept_alive() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let observer = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.register_basic("users", &observer);
        drop(observer);
        assert_eq!(registry.notify_table_changed("users"), 0);
        assert!(registry.dispatcher.flush(Duration::from_secs(2)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.subscription_count("users"), 0);
    }

    #[test]
    fn dropped_content_observer_is_pruned_without_requery() {
        let registry = registry();
        let requeries = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requeries);
        let observer = Arc::new(|_rows: Vec<i64>| {});

        registry.register_content("numbers", &observer, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(vec![1_i64])
        });
        registry.register_basic("users", &Arc::new(|| {}));
        drop(observer);

        assert_eq!(registry.notify_table_changed("numbers"), 0);
        assert_eq!(registry.subscription_count("numbers"), 0);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(registry.executor.stats().completed, 0);
        assert_eq!(requeries.load(Ordering::SeqCst), 0);
        // Pruning is scoped to the signalled table.
        assert_eq!(registry.subscription_count("users"), 1);
    }

    #[test]
    fn queued_requery_is_skipped_once_observer_is_dropped() {
        let registry = registry();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Arc::new(Mutex::new(gate_rx));
        let (busy_tx, busy_rx) = mpsc::channel::<()>();
        for _ in 0..2 {
            let gate_rx = Arc::clone(&gate_rx);
            let busy_tx = busy_tx.clone();
            registry.executor.submit(move || {
                busy_tx.send(()).expect("receiver should be alive");
                let _ = gate_rx
                    .lock()
                    .expect("gate lock should not be poisoned")
                    .recv_timeout(Duration::from_secs(2));
            });
        }
        for _ in 0..2 {
            busy_rx
                .recv_timeout(Duration::from_secs(2))
                .expect("worker should be occupied");
        }

        let requeries = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requeries);
        let observer = Arc::new(|_rows: Vec<i64>| {});
        registry.register_content("numbers", &observer, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(vec![1_i64])
        });
        assert_eq!(registry.notify_table_changed("numbers"), 1);
        drop(observer);
        gate_tx.send(()).expect("first worker should be waiting");
        gate_tx.send(()).expect("second worker should be waiting");

        wait_for_completed(&registry, 3);
        assert_eq!(requeries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn content_observer_receives_requery_result() {
        let registry = registry();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let observer = Arc::new(move |rows: Vec<i64>| {
            tx.lock()
                .expect("sender lock should not be poisoned")
                .send(rows)
                .expect("receiver should be alive");
        });

        registry.register_content("numbers", &observer, || Some(vec![1_i64, 2, 3]));
        registry.notify_table_changed("numbers");

        let rows = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("content delivery should arrive");
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[test]
    fn older_requery_result_is_dropped_after_newer_delivery() {
        let registry = registry();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let observer = Arc::new(move |rows: Vec<i64>| {
            tx.lock()
                .expect("sender lock should not be poisoned")
                .send(rows)
                .expect("receiver should be alive");
        });

        let calls = Arc::new(AtomicUsize::new(0));
        registry.register_content("numbers", &observer, move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == 1 {
                let _ = started_tx
                    .lock()
                    .expect("sender lock should not be poisoned")
                    .send(());
                let _ = gate_rx
                    .lock()
                    .expect("gate lock should not be poisoned")
                    .recv_timeout(Duration::from_secs(2));
            }
            Some(vec![call as i64])
        });

        registry.notify_table_changed("numbers");
        started_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("first requery should start");
        registry.notify_table_changed("numbers");

        let newer = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("second requery should deliver while the first is blocked");
        assert_eq!(newer, vec![2]);

        gate_tx.send(()).expect("first requery should be waiting");
        wait_for_completed(&registry, 2);
        assert!(registry.dispatcher.flush(Duration::from_secs(2)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn in_flight_requery_is_dropped_after_unregister() {
        let registry = registry();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let observer = Arc::new(move |_rows: Vec<i64>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = registry.register_content("numbers", &observer, move || {
            let _ = started_tx
                .lock()
                .expect("sender lock should not be poisoned")
                .send(());
            let _ = gate_rx
                .lock()
                .expect("gate lock should not be poisoned")
                .recv_timeout(Duration::from_secs(2));
            Some(vec![5_i64])
        });

        registry.notify_table_changed("numbers");
        started_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("requery should start");
        registry.unregister(id);
        gate_tx.send(()).expect("requery should be waiting");

        std::thread::sleep(Duration::from_millis(100));
        assert!(registry.dispatcher.flush(Duration::from_secs(2)));
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    fn wait_for_completed(registry: &ChangeRegistry, expected: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while registry.executor.stats().completed < expected {
            assert!(Instant::now() < deadline, "executor did not finish in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
