//! Dependency tracking and update scheduling.
//!
//! This module implements the core reactive machinery: deps, watchers, the
//! batching scheduler, and the tick queue.
//!
//! # Concepts
//!
//! ## Deps
//!
//! A [`Dep`] represents one observable slot and holds the slot's subscriber
//! set. Reading a slot while a watcher is evaluating subscribes that watcher;
//! writing the slot notifies every subscriber.
//!
//! ## Watchers
//!
//! A [`Watcher`] is a unit of re-run logic: it evaluates an expression,
//! records the deps the evaluation touched, and is notified when any of them
//! change. Render bindings, computed properties, and user observers are all
//! watchers distinguished only by their [`WatcherConfig`] flags.
//!
//! ## Scheduler and ticks
//!
//! By default a notified watcher does not re-run immediately: it is queued,
//! deduplicated by ID, and drained in one batched pass per tick, in creation
//! order. [`next_tick`] is the deferral primitive that places the flush (and
//! any user callbacks) at the next asynchronous boundary.
//!
//! # Implementation Notes
//!
//! The "currently evaluating watcher" lives on a thread-local stack
//! ([`TargetStack`]) so nested evaluation — a computed watcher evaluated
//! while a render watcher is active — saves and restores the outer target
//! automatically. This transparent-tracking approach is shared by Vue,
//! SolidJS, and Leptos.

pub(crate) mod context;
mod dep;
mod scheduler;
mod tick;
pub(crate) mod traverse;
pub(crate) mod watcher;

pub use context::{TargetGuard, TargetStack};
pub use dep::{Dep, DepId};
pub use scheduler::{queue_watcher, MAX_UPDATE_DEPTH};
pub use tick::{next_tick, next_tick_deferred, with_macro_task, TickFuture};
pub use watcher::{
    BeforeHook, WatchCallback, WatchGetter, WatchSource, Watcher, WatcherConfig, WatcherId,
};
