//! Integration tests for the reactive core.
//!
//! These exercise the full pipeline: slot mutation, dep notification, the
//! batching scheduler, and the tick queue.
//!
//! The scheduler and tick queue are process-global, so tests that flush run
//! one at a time behind a lock, each on its own current-thread runtime. On a
//! current-thread runtime the deferred flush only runs at an await point,
//! which is what makes "nothing fired before the tick" assertions meaningful.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use trellis_core::{
    next_tick, next_tick_deferred, queue_watcher, with_macro_task, Owner, Value, WatchCallback,
    WatchSource, Watcher, WatcherConfig, MAX_UPDATE_DEPTH,
};

static SCHEDULER_LOCK: Mutex<()> = Mutex::new(());

fn run_reactive<F, Fut>(test: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let _serial = SCHEDULER_LOCK.lock();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");
    runtime.block_on(test());
    // Drain any trailing batch so the next test starts from a clean queue.
    runtime.block_on(next_tick_deferred());
}

type Record = Arc<Mutex<Vec<(Value, Value)>>>;

fn recorder() -> (Record, WatchCallback) {
    let record: Record = Arc::new(Mutex::new(Vec::new()));
    let record_in_cb = Arc::clone(&record);
    let callback: WatchCallback = Arc::new(move |_owner, new, old| {
        record_in_cb.lock().push((new.clone(), old.clone()));
        Ok(())
    });
    (record, callback)
}

fn int_pairs(record: &Record) -> Vec<(Option<i64>, Option<i64>)> {
    record
        .lock()
        .iter()
        .map(|(new, old)| (new.as_int(), old.as_int()))
        .collect()
}

#[test]
fn callback_fires_once_after_the_tick_flush() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let (record, callback) = recorder();
        owner
            .watch(WatchSource::path("x"), callback, WatcherConfig::default())
            .unwrap();

        owner.data().set("x", 2i64).unwrap();
        // Mutation is synchronous, the reaction is not.
        assert!(record.lock().is_empty());

        next_tick_deferred().await;
        assert_eq!(int_pairs(&record), vec![(Some(2), Some(1))]);
    });
}

#[test]
fn synchronous_mutation_storm_coalesces_to_one_run() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let (record, callback) = recorder();
        owner
            .watch(WatchSource::path("x"), callback, WatcherConfig::default())
            .unwrap();

        owner.data().set("x", 2i64).unwrap();
        owner.data().set("x", 3i64).unwrap();
        assert!(record.lock().is_empty());

        next_tick_deferred().await;
        // Exactly one batched run, last value only.
        assert_eq!(int_pairs(&record), vec![(Some(3), Some(1))]);
    });
}

#[test]
fn queueing_the_same_watcher_twice_runs_it_once() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let evals = Arc::new(Mutex::new(0u32));
        let evals_in_getter = Arc::clone(&evals);
        let watcher = Watcher::new(
            &owner,
            WatchSource::named("x", move |owner: &Owner| {
                *evals_in_getter.lock() += 1;
                Ok(owner.data().get("x"))
            }),
            None,
            WatcherConfig::default(),
            false,
        )
        .unwrap();
        assert_eq!(*evals.lock(), 1);

        queue_watcher(&watcher);
        queue_watcher(&watcher);
        next_tick_deferred().await;

        assert_eq!(*evals.lock(), 2);
    });
}

#[test]
fn flush_runs_watchers_in_creation_order() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let make = |tag: &'static str| {
            let order = Arc::clone(&order);
            Watcher::new(
                &owner,
                WatchSource::named(tag, move |owner: &Owner| {
                    order.lock().push(tag);
                    Ok(owner.data().get("x"))
                }),
                None,
                WatcherConfig::default(),
                false,
            )
            .unwrap()
        };

        let a = make("a");
        let b = make("b");
        let c = make("c");
        order.lock().clear();

        // Queue out of order; the flush sorts by ascending creation ID.
        queue_watcher(&c);
        queue_watcher(&a);
        queue_watcher(&b);
        next_tick_deferred().await;

        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
        assert!(a.id() < b.id() && b.id() < c.id());
    });
}

#[test]
fn watcher_created_mid_flush_joins_the_current_flush() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let order_in_a = Arc::clone(&order);
        let owner_in_a = owner.clone();
        let late: Arc<Mutex<Option<Watcher>>> = Arc::new(Mutex::new(None));
        let late_in_a = Arc::clone(&late);
        owner
            .watch(
                WatchSource::path("x"),
                Arc::new(move |_owner, _new, _old| {
                    order_in_a.lock().push("a");
                    // Spin up a new binding while the flush is running and
                    // immediately dirty it.
                    let order_in_b = Arc::clone(&order_in_a);
                    let watcher = owner_in_a.watch(
                        WatchSource::path("y"),
                        Arc::new(move |_owner, _new, _old| {
                            order_in_b.lock().push("b");
                            Ok(())
                        }),
                        WatcherConfig::default(),
                    )?;
                    *late_in_a.lock() = Some(watcher);
                    owner_in_a.data().set("y", 1i64)?;
                    Ok(())
                }),
                WatcherConfig::default(),
            )
            .unwrap();

        owner.data().set("x", 2i64).unwrap();
        next_tick_deferred().await;

        // One flush served both: "b" was queued behind the cursor and ran
        // without waiting for another tick.
        assert_eq!(*order.lock(), vec!["a", "b"]);
    });
}

#[test]
fn teardown_cancels_a_scheduled_run() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let (record, callback) = recorder();
        let watcher = owner
            .watch(WatchSource::path("x"), callback, WatcherConfig::default())
            .unwrap();

        owner.data().set("x", 2i64).unwrap();
        // Queued but not yet run; teardown must win.
        watcher.teardown();
        watcher.teardown();

        next_tick_deferred().await;
        assert!(record.lock().is_empty());

        owner.data().set("x", 3i64).unwrap();
        next_tick_deferred().await;
        assert!(record.lock().is_empty());
    });
}

#[test]
fn next_tick_inside_a_flush_lands_in_a_later_batch() {
    run_reactive(|| async {
        let marker: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        let marker_outer = Arc::clone(&marker);
        next_tick(move || {
            marker_outer.lock().push(1);
            let marker_inner = Arc::clone(&marker_outer);
            next_tick(move || {
                marker_inner.lock().push(2);
                Ok(())
            });
            Ok(())
        });

        next_tick_deferred().await;
        // The nested callback was scheduled during the flush: new batch.
        assert_eq!(*marker.lock(), vec![1]);

        next_tick_deferred().await;
        assert_eq!(*marker.lock(), vec![1, 2]);
    });
}

#[test]
fn circular_update_is_bounded_and_reported() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("n", 0i64).unwrap();

        let reported: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let reported_in_sink = Arc::clone(&reported);
        owner.set_error_sink(move |err| reported_in_sink.lock().push(err.to_string()));

        let runs = Arc::new(Mutex::new(0u32));
        let runs_in_cb = Arc::clone(&runs);
        let owner_in_cb = owner.clone();
        owner
            .watch(
                WatchSource::path("n"),
                Arc::new(move |_owner, new, _old| {
                    *runs_in_cb.lock() += 1;
                    // Mutating our own dependency re-queues us mid-flush.
                    let next = new.as_int().unwrap_or(0) + 1;
                    owner_in_cb.data().set("n", next)?;
                    Ok(())
                }),
                WatcherConfig::default(),
            )
            .unwrap();

        owner.data().set("n", 1i64).unwrap();
        next_tick_deferred().await;

        // Stopped at the bound instead of hanging, and the rest of the queue
        // kept flushing.
        assert_eq!(*runs.lock(), MAX_UPDATE_DEPTH);
        let reported = reported.lock();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("infinite update loop"));
        assert!(reported[0].contains("\"n\""));
    });
}

#[test]
fn updated_hook_runs_after_the_primary_watcher_flushes() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let renders = Arc::new(Mutex::new(0u32));
        let renders_in_getter = Arc::clone(&renders);
        let _render = Watcher::new(
            &owner,
            WatchSource::named("<render>", move |owner: &Owner| {
                *renders_in_getter.lock() += 1;
                Ok(owner.data().get("x"))
            }),
            None,
            WatcherConfig::default(),
            true,
        )
        .unwrap();
        owner.set_mounted(true);

        let updated = Arc::new(Mutex::new(0u32));
        let updated_in_hook = Arc::clone(&updated);
        owner.on_updated(move || *updated_in_hook.lock() += 1);

        owner.data().set("x", 2i64).unwrap();
        assert_eq!(*updated.lock(), 0);

        next_tick_deferred().await;
        assert_eq!(*renders.lock(), 2);
        assert_eq!(*updated.lock(), 1);
    });
}

#[test]
fn computed_watcher_reevaluates_on_demand_and_forwards_deps() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("x", 2i64).unwrap();

        let computed = Watcher::new(
            &owner,
            WatchSource::named("x * 2", |owner: &Owner| {
                let x = owner.data().get("x").as_int().unwrap_or(0);
                Ok(Value::Int(x * 2))
            }),
            None,
            WatcherConfig {
                lazy: true,
                ..Default::default()
            },
            false,
        )
        .unwrap();

        let (record, callback) = recorder();
        let computed_in_getter = computed.clone();
        let consumer = Watcher::new(
            &owner,
            WatchSource::named("doubled", move |_owner: &Owner| {
                if computed_in_getter.dirty() {
                    computed_in_getter.evaluate()?;
                }
                // The consumer subscribes to the computed watcher's own deps,
                // not to the computed watcher directly.
                computed_in_getter.depend();
                Ok(computed_in_getter.value())
            }),
            Some(callback),
            WatcherConfig::default(),
            false,
        )
        .unwrap();

        assert_eq!(consumer.value().as_int(), Some(4));
        assert!(!computed.dirty());

        owner.data().set("x", 3i64).unwrap();
        // The lazy watcher only went dirty; nothing evaluated yet.
        assert!(computed.dirty());
        assert!(record.lock().is_empty());

        next_tick_deferred().await;
        assert_eq!(int_pairs(&record), vec![(Some(6), Some(4))]);
        assert!(!computed.dirty());
    });
}

#[test]
fn with_macro_task_defers_through_the_timer_path() {
    run_reactive(|| async {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let (record, callback) = recorder();
        owner
            .watch(WatchSource::path("x"), callback, WatcherConfig::default())
            .unwrap();

        let result = with_macro_task(|| {
            owner.data().set("x", 2i64).unwrap();
            assert!(record.lock().is_empty());
            42
        });
        assert_eq!(result, 42);

        next_tick_deferred().await;
        assert_eq!(int_pairs(&record), vec![(Some(2), Some(1))]);
    });
}

#[test]
fn json_built_state_is_fully_tracked() {
    run_reactive(|| async {
        let json = serde_json::json!({
            "user": { "name": "Ada", "logins": 1 },
            "tags": ["admin"]
        });
        let Value::Map(data) = Value::from_json(&json) else {
            panic!("object should build a map");
        };
        let owner = Owner::with_data(data);

        let (record, callback) = recorder();
        owner
            .watch(
                WatchSource::path("user.name"),
                callback,
                WatcherConfig::default(),
            )
            .unwrap();

        let user = owner.data().get("user");
        user.as_map().unwrap().set("name", "Grace").unwrap();
        next_tick_deferred().await;

        let record = record.lock();
        assert_eq!(record.len(), 1);
        assert_eq!(record[0].0.as_str(), Some("Grace"));
        assert_eq!(record[0].1.as_str(), Some("Ada"));

        let snapshot = Value::Map(owner.data().clone()).to_json();
        assert_eq!(snapshot["user"]["name"], "Grace");
        assert_eq!(snapshot["tags"][0], "admin");
    });
}

#[test]
fn replacing_an_intermediate_map_refires_a_nested_path() {
    run_reactive(|| async {
        let owner = Owner::new();
        let user = trellis_core::ObservedMap::new();
        user.set("name", "Ada").unwrap();
        owner.data().set("user", Value::Map(user)).unwrap();

        let (record, callback) = recorder();
        owner
            .watch(
                WatchSource::path("user.name"),
                callback,
                WatcherConfig::default(),
            )
            .unwrap();

        // Wholesale replacement of the intermediate map.
        let replacement = trellis_core::ObservedMap::new();
        replacement.set("name", "Grace").unwrap();
        owner.data().set("user", Value::Map(replacement)).unwrap();

        next_tick_deferred().await;
        let record = record.lock();
        assert_eq!(record.len(), 1);
        assert_eq!(record[0].0.as_str(), Some("Grace"));
    });
}

// Synchronous watchers bypass the scheduler entirely, so these run without a
// runtime.

#[test]
fn sync_notification_order_follows_creation_ids() {
    let owner = Owner::new();
    owner.data().set("flag", false).unwrap();
    owner.data().set("x", 0i64).unwrap();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    // "a" is created first (lower ID) but reads "x" only once the flag flips,
    // so it subscribes to "x" *after* "b" does.
    let order_in_a = Arc::clone(&order);
    let a = Watcher::new(
        &owner,
        WatchSource::named("flag && x", move |owner: &Owner| {
            let data = owner.data();
            if data.get("flag").as_bool() == Some(true) {
                order_in_a.lock().push("a");
                Ok(data.get("x"))
            } else {
                Ok(Value::Null)
            }
        }),
        None,
        WatcherConfig {
            sync: true,
            ..Default::default()
        },
        false,
    )
    .unwrap();

    let order_in_b = Arc::clone(&order);
    let b = Watcher::new(
        &owner,
        WatchSource::named("x", move |owner: &Owner| {
            order_in_b.lock().push("b");
            Ok(owner.data().get("x"))
        }),
        None,
        WatcherConfig {
            sync: true,
            ..Default::default()
        },
        false,
    )
    .unwrap();
    assert!(a.id() < b.id());

    owner.data().set("flag", true).unwrap();
    order.lock().clear();

    // Subscription order on "x" is [b, a]; notification still runs by ID.
    owner.data().set("x", 1i64).unwrap();
    assert_eq!(*order.lock(), vec!["a", "b"]);
}

#[test]
fn nan_write_guard_and_refire_quirk() {
    let owner = Owner::new();
    owner.data().set("x", f64::NAN).unwrap();

    let evals = Arc::new(Mutex::new(0u32));
    let evals_in_getter = Arc::clone(&evals);
    Watcher::new(
        &owner,
        WatchSource::named("x", move |owner: &Owner| {
            *evals_in_getter.lock() += 1;
            Ok(owner.data().get("x"))
        }),
        None,
        WatcherConfig {
            sync: true,
            ..Default::default()
        },
        false,
    )
    .unwrap();
    assert_eq!(*evals.lock(), 1);

    // NaN over NaN is treated as identical by the write guard.
    owner.data().set("x", f64::NAN).unwrap();
    assert_eq!(*evals.lock(), 1);

    // A real change still notifies.
    owner.data().set("x", 1.0f64).unwrap();
    assert_eq!(*evals.lock(), 2);
}
