//! Deferred-callback ("tick") queue.
//!
//! Batches callbacks (including the scheduler's flush) and runs the batch at
//! the next asynchronous boundary. Two deferral flavors are supported:
//!
//! - **Task** (the default, microtask-like): the flush is spawned directly on
//!   the ambient tokio runtime and runs at its next yield point, ahead of any
//!   timer.
//! - **Macrotask-like**: the flush passes through the timer wheel first, so it
//!   runs behind timers and IO already armed in the same loop iteration. Used
//!   when host-event-handler timing interacts with other queued work; see
//!   [`with_macro_task`].
//!
//! The available strategy is probed once, at the first deferral: if no async
//! runtime is ambient at that point, both flavors fall back to flushing on a
//! short-lived dedicated thread.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::{report_unhandled, CoreError, DynError};

type TickCallback = Box<dyn FnOnce() -> Result<(), DynError> + Send + 'static>;

fn callbacks() -> &'static Mutex<Vec<TickCallback>> {
    static CALLBACKS: OnceLock<Mutex<Vec<TickCallback>>> = OnceLock::new();
    CALLBACKS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Whether a flush is already scheduled for the current batch.
static PENDING: AtomicBool = AtomicBool::new(false);

thread_local! {
    static FORCE_MACRO_TASK: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferralStrategy {
    /// Spawn the flush as a task on the ambient async runtime.
    Task,
    /// No runtime was ambient at probe time: flush on a dedicated thread.
    Thread,
}

/// Probe the environment for the preferred deferral primitive.
///
/// Selection happens once, not per call.
fn strategy() -> DeferralStrategy {
    static STRATEGY: OnceLock<DeferralStrategy> = OnceLock::new();
    *STRATEGY.get_or_init(|| {
        if Handle::try_current().is_ok() {
            DeferralStrategy::Task
        } else {
            DeferralStrategy::Thread
        }
    })
}

fn schedule_flush(use_macro_task: bool) {
    match (strategy(), Handle::try_current()) {
        (DeferralStrategy::Task, Ok(handle)) => {
            if use_macro_task {
                handle.spawn(async {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    flush_callbacks();
                });
            } else {
                handle.spawn(async {
                    flush_callbacks();
                });
            }
        }
        // Either the probe chose the thread fallback, or the Task strategy
        // was chosen but the caller is outside any runtime right now.
        _ => {
            std::thread::spawn(move || {
                if use_macro_task {
                    std::thread::sleep(Duration::from_millis(1));
                }
                flush_callbacks();
            });
        }
    }
}

/// Defer a callback to the next tick.
///
/// The callback's error, if any, is reported individually so one failing
/// callback never blocks the rest of its batch. Exactly one flush is
/// scheduled per batch.
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() -> Result<(), DynError> + Send + 'static,
{
    callbacks().lock().push(Box::new(callback));
    if !PENDING.swap(true, Ordering::SeqCst) {
        schedule_flush(FORCE_MACRO_TASK.with(Cell::get));
    }
}

/// Defer with no callback: returns a future resolved after the batch flushes.
pub fn next_tick_deferred() -> TickFuture {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
        Ok(())
    });
    TickFuture { receiver: rx }
}

/// Resolves once the tick batch it was registered in has flushed.
pub struct TickFuture {
    receiver: oneshot::Receiver<()>,
}

impl Future for TickFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.receiver).poll(cx).map(|_| ())
    }
}

/// Run `task` with macrotask-like deferral forced for any `next_tick` calls
/// it makes synchronously.
pub fn with_macro_task<R>(task: impl FnOnce() -> R) -> R {
    FORCE_MACRO_TASK.with(|flag| {
        let previous = flag.replace(true);
        let result = task();
        flag.set(previous);
        result
    })
}

/// Run the current batch.
///
/// The pending flag clears and the list is taken *before* any callback runs,
/// so callbacks that schedule further ticks land in a fresh batch, never the
/// one being flushed.
fn flush_callbacks() {
    PENDING.store(false, Ordering::SeqCst);
    let batch: Vec<TickCallback> = std::mem::take(&mut *callbacks().lock());
    for callback in batch {
        if let Err(source) = callback() {
            report_unhandled(&CoreError::Tick { source });
        }
    }
}
