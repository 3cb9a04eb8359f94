//! Watcher scheduler.
//!
//! Queued watchers are deduplicated by ID and drained in one batched pass per
//! tick. Sorting the queue by ascending watcher ID before the pass guarantees
//! that parents run before their descendants and that computed and user
//! watchers created before a component's render watcher run first.
//!
//! The queue may grow while it is being flushed: a watcher's side effects can
//! queue further watchers. Late arrivals are inserted at their sorted position
//! relative to the flush cursor, so a watcher whose ID falls within the
//! remaining range joins the current flush instead of waiting a tick.
//!
//! A per-flush run counter bounds runaway cycles: a watcher that keeps
//! re-queueing itself past [`MAX_UPDATE_DEPTH`] is dropped from the flush with
//! a fatal diagnostic while the rest of the queue keeps draining.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use parking_lot::Mutex;

use super::tick::next_tick;
use super::watcher::{Watcher, WatcherId};
use crate::error::CoreError;

/// Maximum times one watcher may run within a single flush window.
pub const MAX_UPDATE_DEPTH: u32 = 100;

#[derive(Default)]
struct SchedulerState {
    /// Pending watchers, sorted by ID once the flush begins.
    queue: Vec<Watcher>,
    /// IDs currently queued; cleared per entry as the flush reaches it so a
    /// watcher may legitimately re-queue during its own run.
    has: HashSet<WatcherId>,
    /// Per-flush run counts, keyed by watcher ID.
    circular: HashMap<WatcherId, u32>,
    /// Watchers already reported as circular this flush window.
    reported: HashSet<WatcherId>,
    flushing: bool,
    waiting: bool,
    /// Position of the entry currently being run.
    index: usize,
}

fn state() -> &'static Mutex<SchedulerState> {
    static STATE: OnceLock<Mutex<SchedulerState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(SchedulerState::default()))
}

/// Queue a watcher for the next flush.
///
/// Idempotent per flush cycle: a watcher queued twice before the flush runs
/// exactly once. The first queued watcher arms one flush via the tick queue.
pub fn queue_watcher(watcher: &Watcher) {
    let id = watcher.id();
    let mut s = state().lock();
    if s.has.contains(&id) {
        return;
    }
    s.has.insert(id);

    if !s.flushing {
        s.queue.push(watcher.clone());
    } else {
        // Already flushing: splice in by ID, but never before the cursor.
        let mut i = s.queue.len();
        while i > s.index + 1 && s.queue[i - 1].id() > id {
            i -= 1;
        }
        s.queue.insert(i, watcher.clone());
    }

    if !s.waiting {
        s.waiting = true;
        drop(s);
        next_tick(|| flush_scheduler_queue().map_err(Into::into));
    }
}

/// Drain the queue: run every pending watcher in ascending ID order.
///
/// Iteration re-reads the live queue length each step because entries may be
/// spliced in mid-flush. An internal (non-user) error aborts the remainder of
/// the pass and propagates to the tick layer; scheduler state is reset either
/// way so the next mutation starts a fresh flush.
pub(crate) fn flush_scheduler_queue() -> Result<(), CoreError> {
    {
        let mut s = state().lock();
        s.flushing = true;
        s.queue.sort_by_key(|w| w.id());
    }

    let mut result = Ok(());
    let mut idx = 0;
    loop {
        let (watcher, overflow, first_report) = {
            let mut s = state().lock();
            if idx >= s.queue.len() {
                break;
            }
            s.index = idx;
            let watcher = s.queue[idx].clone();
            let id = watcher.id();
            s.has.remove(&id);
            let count = s.circular.entry(id).or_insert(0);
            *count += 1;
            let overflow = *count > MAX_UPDATE_DEPTH;
            let first_report = overflow && s.reported.insert(id);
            (watcher, overflow, first_report)
        };

        if overflow {
            if first_report {
                let err = CoreError::CircularUpdate {
                    expression: watcher.expression().to_owned(),
                };
                match watcher.owner() {
                    Some(owner) => owner.report(&err),
                    None => crate::error::report_unhandled(&err),
                }
            }
            idx += 1;
            continue;
        }

        watcher.call_before();
        if let Err(err) = watcher.run() {
            result = Err(err);
            break;
        }
        idx += 1;
    }

    // Keep the processed queue for the post-flush hooks, then reset.
    let snapshot = {
        let mut s = state().lock();
        let snapshot = std::mem::take(&mut s.queue);
        s.has.clear();
        s.circular.clear();
        s.reported.clear();
        s.flushing = false;
        s.waiting = false;
        s.index = 0;
        snapshot
    };

    call_updated_hooks(&snapshot);
    result
}

/// Invoke owners' `updated` hooks for primary watchers that just flushed, in
/// the flushed order.
fn call_updated_hooks(queue: &[Watcher]) {
    for watcher in queue {
        if let Some(owner) = watcher.owner() {
            if owner.is_primary(watcher) && owner.is_mounted() && !owner.is_destroying() {
                owner.call_updated();
            }
        }
    }
}
