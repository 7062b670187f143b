//! Integration Tests for the Store
//!
//! These tests drive the store on a real tokio runtime. On the
//! current-thread runtime flushes run once the test task yields; on a
//! multi-thread runtime they wait for `run_pending`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use stash_core::{Input, KeyError, ObserverOptions, Store, StoreConfig, WriteOutcome};

type TestStore = Store<&'static str, i64>;

/// Let spawned flushes and tasks run.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn count_notifications(store: &TestStore) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    store.subscribe(
        move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        },
        false,
    );
    count
}

/// Test that a synchronous burst of writes produces one notification.
#[tokio::test]
async fn set_state_burst_notifies_once() {
    let store: TestStore = Store::new([("a", 0)]);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    store.subscribe(
        move |state, _| {
            seen_clone.lock().push(state.get("a").copied());
        },
        false,
    );

    store.set_state([("a", 1)]);
    store.set_state([("a", 2), ("b", 3)]);
    store.set_state([("a", 3)]);

    // Nothing is delivered until the task yields
    assert!(seen.lock().is_empty());

    settle().await;

    // Only the final state is observed
    assert_eq!(*seen.lock(), vec![Some(3)]);
}

/// Test that a literal write is visible and settled after the flush.
#[tokio::test]
async fn literal_set_is_visible_after_flush() {
    let store: TestStore = Store::new([]);

    let outcome = store.set("k", Input::Literal(42)).await;
    settle().await;

    assert_eq!(outcome, WriteOutcome::Applied);
    assert_eq!(store.get(&"k"), Some(42));
    assert!(!store.loading(&["k"]));
}

/// Test the pending and settled phases of a deferred write.
#[tokio::test]
async fn deferred_write_loads_then_settles() {
    let store: TestStore = Store::new([("k", 1)]);
    let (tx, rx) = oneshot::channel::<i64>();

    let completion = store.set("k", Input::deferred(rx));

    // Pending: the old value is withdrawn
    assert!(store.loading(&["k"]));
    assert_eq!(store.get(&"k"), None);

    tx.send(7).unwrap();
    assert_eq!(completion.await, WriteOutcome::Applied);

    assert!(!store.loading(&["k"]));
    assert_eq!(store.get(&"k"), Some(7));
}

/// Test that a rejected deferred write surfaces as a key error.
#[tokio::test]
async fn rejected_deferred_write_sets_error() {
    let store: TestStore = Store::new([]);

    let completion = store.set(
        "k",
        Input::deferred(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err::<i64, _>("service unavailable")
        }),
    );

    assert_eq!(completion.await, WriteOutcome::Failed);

    assert_eq!(store.get(&"k"), None);
    assert!(store.loaded(&["k"]));
    let err = store.error(&["k"]).expect("rejection recorded");
    assert!(matches!(err, KeyError::Rejected(_)));
    assert_eq!(err.reason().to_string(), "service unavailable");
}

/// Test that an older deferred result cannot overwrite a newer literal.
#[tokio::test]
async fn stale_deferred_result_does_not_overwrite() {
    let store: TestStore = Store::new([]);
    let (tx, rx) = oneshot::channel::<i64>();

    let stale = store.set("a", Input::deferred(rx));
    store.set("a", Input::Literal(2));

    tx.send(1).unwrap();
    assert_eq!(stale.await, WriteOutcome::Superseded);
    settle().await;

    assert_eq!(store.get(&"a"), Some(2));
    assert!(!store.loading(&["a"]));
}

/// Test observer values, batching and terminal errors.
#[tokio::test]
async fn observer_batches_values_and_stops_after_error() {
    let store: TestStore = Store::new([]);
    let observer = store.observer("k", ObserverOptions::new());
    settle().await;

    let count = count_notifications(&store);

    observer.next(5);
    observer.next(10);
    settle().await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(&"k"), Some(10));

    observer.error("feed dropped");
    observer.next(11);
    settle().await;

    assert_eq!(store.get(&"k"), None);
    assert!(!store.live(&["k"]));
    let err = store.error(&["k"]).expect("stream error recorded");
    assert_eq!(err.reason().to_string(), "feed dropped");
}

/// Test that unsetting a streamed key tears the stream down exactly once.
#[tokio::test]
async fn unset_tears_down_stream() {
    let store: TestStore = Store::new([]);
    let (tx, rx) = mpsc::unbounded_channel::<i64>();

    let source = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|value| (Ok::<_, &str>(value), rx))
    });
    let _ = store.set("k", Input::stream(source));

    tx.send(1).unwrap();
    settle().await;
    assert_eq!(store.get(&"k"), Some(1));
    assert!(store.live(&["k"]));

    store.unset(&["k"]);
    settle().await;

    // The pump task was aborted and dropped the receiver
    assert!(tx.is_closed());
    assert!(!store.known(&["k"]));
    assert!(!store.live(&["k"]));

    // A second unset has nothing left to tear down
    store.unset(&["k"]);
    settle().await;
    assert_eq!(store.get(&"k"), None);
}

/// Test that a superseding stream detaches the previous one.
#[tokio::test]
async fn new_stream_supersedes_old_stream() {
    let store: TestStore = Store::new([]);
    let (old_tx, old_rx) = mpsc::unbounded_channel::<i64>();
    let (new_tx, new_rx) = mpsc::unbounded_channel::<i64>();

    let channel = |rx: mpsc::UnboundedReceiver<i64>| {
        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|value| (Ok::<_, &str>(value), rx))
        })
    };

    let _ = store.set("k", Input::stream(channel(old_rx)));
    settle().await;
    let _ = store.set("k", Input::stream(channel(new_rx)));
    settle().await;

    assert!(old_tx.is_closed());
    let _ = old_tx.send(1);
    new_tx.send(2).unwrap();
    settle().await;

    assert_eq!(store.get(&"k"), Some(2));
    assert!(store.live(&["k"]));
}

/// Test that writing a getter's source notifies the getter's listeners.
#[tokio::test]
async fn getter_source_write_notifies_derived_listeners() {
    let store: TestStore = Store::new([("price", 10), ("qty", 2)]);
    store.getter(
        "total",
        |state| state.get("price").unwrap_or(&0) * state.get("qty").unwrap_or(&0),
        ["price", "qty"],
    );
    settle().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    store.subscribe_keys(
        ["total"],
        move |state, ctx| {
            assert!(ctx.has_changed(&"total"));
            seen_clone.lock().push(state.get("total").copied());
        },
        false,
    );

    store.set("price", Input::Literal(15));
    settle().await;

    assert_eq!(*seen.lock(), vec![Some(30)]);
    assert_eq!(store.get(&"total"), Some(30));
    assert!(store.known(&["total"]));

    // A plain write replaces the getter
    store.set("total", Input::Literal(1));
    store.set("price", Input::Literal(20));
    settle().await;
    assert_eq!(store.get(&"total"), Some(1));
}

/// Test that until_loaded waits for every listed key.
#[tokio::test]
async fn until_loaded_waits_for_pending_keys() {
    let store: TestStore = Store::new([]);
    let (tx_a, rx_a) = oneshot::channel::<i64>();
    let (tx_b, rx_b) = oneshot::channel::<i64>();

    let _ = store.set("a", Input::deferred(rx_a));
    let _ = store.set("b", Input::deferred(rx_b));

    let loaded = tokio::spawn(store.until_loaded(&["a", "b"]));

    tx_a.send(1).unwrap();
    settle().await;
    assert!(!loaded.is_finished());

    tx_b.send(2).unwrap();
    let state = loaded.await.unwrap();

    assert_eq!(state.get("a"), Some(&1));
    assert_eq!(state.get("b"), Some(&2));
    assert_eq!(store.subscriber_count(), 0);
}

/// Test that the context reports per-key metadata to subscribers.
#[tokio::test]
async fn subscribers_see_loading_context() {
    let store: TestStore = Store::new([]);
    let loading_seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = loading_seen.clone();
    store.subscribe(
        move |_, ctx| {
            seen_clone.lock().push(ctx.is_loading(&"k"));
        },
        false,
    );

    let (tx, rx) = oneshot::channel::<i64>();
    let completion = store.set("k", Input::deferred(rx));
    settle().await;

    tx.send(3).unwrap();
    completion.await;
    settle().await;

    assert_eq!(*loading_seen.lock(), vec![true, false]);
}

/// Test values of mixed shapes through an enum value type.
#[tokio::test]
async fn enum_values_carry_mixed_types() {
    #[derive(Debug, Clone, PartialEq)]
    enum Field {
        Count(u32),
        Label(String),
    }

    let store = Store::new([("count", Field::Count(0))]);
    store.set("label", Input::Literal(Field::Label("inbox".into())));
    let _ = store
        .set("count", Input::deferred(async { Ok::<_, &str>(Field::Count(3)) }))
        .await;

    let state = store.get_state();
    assert_eq!(state.get("count"), Some(&Field::Count(3)));
    assert_eq!(state.get("label"), Some(&Field::Label("inbox".into())));
}

/// Test that a configuration loaded from JSON shapes store behavior.
#[tokio::test]
async fn json_config_keeps_value_while_pending() {
    let config = StoreConfig::from_json(r#"{ "withdraw_on_pending": false, "name": "profile" }"#)
        .expect("valid config");
    let store: TestStore = Store::with_config([("k", 1)], config);

    let (_tx, rx) = oneshot::channel::<i64>();
    let _ = store.set("k", Input::deferred(rx));

    assert_eq!(store.config().name.as_deref(), Some("profile"));
    assert!(store.loading(&["k"]));
    assert_eq!(store.get(&"k"), Some(1));
}

/// Test that a store created outside a runtime parks its flushes.
#[test]
fn store_without_runtime_flushes_on_demand() {
    let store: TestStore = Store::new([("a", 1)]);
    let count = count_notifications(&store);

    store.set_state([("a", 2)]);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    store.run_pending();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(&"a"), Some(2));
}

/// Test that a synchronous burst on a multi-thread runtime still ends in
/// exactly one notification, even when workers sit idle during the burst.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multi_thread_burst_notifies_once() {
    let store: TestStore = Store::new([("a", 0)]);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    store.subscribe(
        move |state, _| {
            seen_clone.lock().push(state.get("a").copied());
        },
        false,
    );

    store.set_state([("a", 1)]);
    let _ = store.set(
        "p",
        Input::deferred(futures_util::future::pending::<Result<i64, std::io::Error>>()),
    );
    std::thread::sleep(Duration::from_millis(20));
    store.set_state([("a", 2)]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen.lock().is_empty());

    assert_eq!(store.run_pending(), 1);
    assert_eq!(*seen.lock(), vec![Some(2)]);
    assert!(store.loading(&["p"]));
}

/// Test that deferred writes settle on worker threads and are delivered
/// by run_pending on a multi-thread runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multi_thread_deferred_settles_on_workers() {
    let store: TestStore = Store::new([]);
    let count = count_notifications(&store);
    let (tx, rx) = oneshot::channel::<i64>();

    let done = store.set("k", Input::deferred(rx));
    tx.send(5).unwrap();
    assert_eq!(done.await, WriteOutcome::Applied);

    assert_eq!(store.get(&"k"), Some(5));
    assert!(store.loaded(&["k"]));

    assert_eq!(store.run_pending(), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// Test that abandoning an until_loaded future removes its listener.
#[tokio::test]
async fn cancelled_until_loaded_unsubscribes() {
    let store: TestStore = Store::new([]);
    let (_tx, rx) = oneshot::channel::<i64>();
    let _ = store.set("k", Input::deferred(rx));

    for _ in 0..5 {
        let loaded = store.until_loaded(&["k"]);
        let timed_out = tokio::time::timeout(Duration::from_millis(1), loaded).await;
        assert!(timed_out.is_err());
    }

    assert_eq!(store.subscriber_count(), 0);
}
