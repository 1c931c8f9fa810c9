mod common;

use common::{open_store, TestObject};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tablewatch_core::{BasicObserver, Predicate};

const WAIT: Duration = Duration::from_secs(2);

struct FailingObserver;

impl BasicObserver for FailingObserver {
    fn on_table_changed(&self) {
        panic!("observer failure");
    }
}

fn counting_observer() -> (Arc<AtomicUsize>, Arc<impl Fn() + Send + Sync>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let observer = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (calls, observer)
}

fn channel_observer() -> (
    mpsc::Receiver<Vec<TestObject>>,
    Arc<impl Fn(Vec<TestObject>) + Send + Sync>,
) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let observer = Arc::new(move |rows: Vec<TestObject>| {
        let _ = tx.lock().unwrap().send(rows);
    });
    (rx, observer)
}

#[test]
fn basic_observer_sees_each_write_until_unregistered() {
    let (store, table) = open_store();
    let (calls, observer) = counting_observer();
    let id = store.register_basic(table.as_ref(), &observer).unwrap();

    store
        .insert(table.as_ref(), &TestObject::new(1, 1.0, "one"))
        .unwrap();
    store.delete_all(table.as_ref()).unwrap();
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(store.unregister(id));
    store
        .insert(table.as_ref(), &TestObject::new(2, 2.0, "two"))
        .unwrap();
    store.delete_all(table.as_ref()).unwrap();
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    store.shutdown();
}

#[test]
fn registration_alone_does_not_notify() {
    let (store, table) = open_store();
    store
        .insert(table.as_ref(), &TestObject::new(1, 1.0, "before"))
        .unwrap();

    let (calls, observer) = counting_observer();
    store.register_basic(table.as_ref(), &observer).unwrap();
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    store.shutdown();
}

#[test]
fn writes_that_change_nothing_do_not_notify() {
    let (store, table) = open_store();
    let (calls, observer) = counting_observer();
    store.register_basic(table.as_ref(), &observer).unwrap();

    store.delete_all(table.as_ref()).unwrap();
    store.insert_many(table.as_ref(), &[]).unwrap();
    store
        .update(
            table.as_ref(),
            &Predicate::create().equal_to("id", 1),
            &TestObject::new(1, 0.0, "none"),
        )
        .unwrap();
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    store.shutdown();
}

#[test]
fn batch_insert_notifies_once() {
    let (store, table) = open_store();
    let (calls, observer) = counting_observer();
    store.register_basic(table.as_ref(), &observer).unwrap();

    let rows: Vec<TestObject> = (1..=10).map(|id| TestObject::new(id, 0.0, "x")).collect();
    assert_eq!(store.insert_many(table.as_ref(), &rows).unwrap(), 10);
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    store.shutdown();
}

#[test]
fn content_observer_receives_only_rows_matching_its_predicate() {
    let (store, table) = open_store();
    let (rx, observer) = channel_observer();
    store
        .register_content(
            Arc::clone(&table),
            Predicate::create().equal_to("id", 5),
            &observer,
        )
        .unwrap();

    store
        .insert_many(
            table.as_ref(),
            &[TestObject::new(5, 5.0, "five"), TestObject::new(6, 6.0, "six")],
        )
        .unwrap();

    let rows = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(rows, vec![TestObject::new(5, 5.0, "five")]);
    store.shutdown();
}

#[test]
fn content_observer_gets_one_delivery_per_write() {
    let (store, table) = open_store();
    let (rx, observer) = channel_observer();
    store
        .register_content(Arc::clone(&table), Predicate::create(), &observer)
        .unwrap();

    store
        .insert(table.as_ref(), &TestObject::new(1, 1.0, "one"))
        .unwrap();
    let first = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(first.len(), 1);

    store
        .insert(table.as_ref(), &TestObject::new(2, 2.0, "two"))
        .unwrap();
    let second = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(second.len(), 2);
    store.shutdown();
}

#[test]
fn unregistered_content_observer_receives_nothing() {
    let (store, table) = open_store();
    let (rx, observer) = channel_observer();
    let id = store
        .register_content(Arc::clone(&table), Predicate::create(), &observer)
        .unwrap();

    assert!(store.unregister(id));
    assert!(!store.unregister(id));
    store
        .insert(table.as_ref(), &TestObject::new(1, 1.0, "one"))
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    store.shutdown();
}

#[test]
fn same_observer_registered_twice_gets_two_handles() {
    let (store, table) = open_store();
    let (calls, observer) = counting_observer();
    let first = store.register_basic(table.as_ref(), &observer).unwrap();
    let second = store.register_basic(table.as_ref(), &observer).unwrap();
    assert_ne!(first, second);

    store
        .insert(table.as_ref(), &TestObject::new(1, 1.0, "one"))
        .unwrap();
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    store.unregister(first);
    store.delete_all(table.as_ref()).unwrap();
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    store.shutdown();
}

#[test]
fn panicking_observer_does_not_starve_others() {
    let (store, table) = open_store();
    let failing = Arc::new(FailingObserver);
    let (calls, observer) = counting_observer();
    store.register_basic(table.as_ref(), &failing).unwrap();
    store.register_basic(table.as_ref(), &observer).unwrap();

    store
        .insert(table.as_ref(), &TestObject::new(1, 1.0, "one"))
        .unwrap();
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    store.shutdown();
}

#[test]
fn dropped_observer_is_skipped() {
    let (store, table) = open_store();
    let (calls, observer) = counting_observer();
    store.register_basic(table.as_ref(), &observer).unwrap();
    drop(observer);

    store
        .insert(table.as_ref(), &TestObject::new(1, 1.0, "one"))
        .unwrap();
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    store.shutdown();
}

#[test]
fn external_change_signal_reaches_observers() {
    let (store, table) = open_store();
    let (calls, observer) = counting_observer();
    store.register_basic(table.as_ref(), &observer).unwrap();

    assert_eq!(store.notify_table_changed(table.as_ref()).unwrap(), 1);
    assert!(store.flush_notifications(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    store.shutdown();
}

#[test]
fn dropped_content_observer_stops_requeries() {
    let (store, table) = open_store();
    let (_rx, observer) = channel_observer();
    store
        .register_content(Arc::clone(&table), Predicate::create(), &observer)
        .unwrap();
    drop(observer);

    for id in 0..5 {
        store
            .insert(table.as_ref(), &TestObject::new(id, 1.0, "row"))
            .unwrap();
    }
    std::thread::sleep(Duration::from_millis(300));

    let stats = store.executor_stats();
    assert_eq!(stats.submitted, 0);
    assert_eq!(stats.completed, 0);
    assert_eq!(store.notify_table_changed(table.as_ref()).unwrap(), 0);
    store.shutdown();
}

#[test]
fn slow_observer_does_not_delay_other_observers() {
    let (store, table) = open_store();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let slow = Arc::new(move || {
        let _ = release_rx.lock().unwrap().recv_timeout(WAIT);
    });
    let (signal_tx, signal_rx) = mpsc::channel::<()>();
    let signal_tx = Mutex::new(signal_tx);
    let fast = Arc::new(move || {
        let _ = signal_tx.lock().unwrap().send(());
    });
    store.register_basic(table.as_ref(), &slow).unwrap();
    store.register_basic(table.as_ref(), &fast).unwrap();

    store
        .insert(table.as_ref(), &TestObject::new(1, 1.0, "one"))
        .unwrap();
    signal_rx
        .recv_timeout(Duration::from_secs(1))
        .expect("fast observer should be notified while the slow one is busy");

    release_tx.send(()).unwrap();
    assert!(store.flush_notifications(WAIT));
    store.shutdown();
}
