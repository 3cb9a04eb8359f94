//! Trellis Core
//!
//! This crate provides the dependency-tracking and update-scheduling engine
//! for the Trellis reactive UI framework. It implements:
//!
//! - Deps: observable slots with subscriber sets
//! - Watchers: tracked computations with re-evaluation semantics
//! - A batching scheduler with deterministic, creation-order flushing
//! - A tick queue deferring work to the next asynchronous boundary
//! - Observed containers that wire reads and writes into the dep graph
//!
//! Rendering, template parsing, and component lifecycle live in other crates;
//! this one only decides *what to re-run and when*.
//!
//! # Architecture
//!
//! The crate is organized into a few modules:
//!
//! - `reactive`: deps, watchers, the scheduler, and the tick queue
//! - `observe`: observed maps, lists, and the [`Value`] type
//! - `owner`: the component-instance contract watchers are bound to
//! - `error`: error types and routing
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{next_tick_deferred, Owner, WatchSource, WatcherConfig};
//! use std::sync::Arc;
//!
//! let owner = Owner::new();
//! owner.data().set("count", 0i64)?;
//!
//! // Observe a slot: the callback receives (owner, new, old).
//! owner.watch(
//!     WatchSource::path("count"),
//!     Arc::new(|_owner, new, old| {
//!         println!("count: {:?} -> {:?}", old, new);
//!         Ok(())
//!     }),
//!     WatcherConfig::default(),
//! )?;
//!
//! // Mutations are batched; one flush runs at the next tick.
//! owner.data().set("count", 1i64)?;
//! owner.data().set("count", 2i64)?;
//! next_tick_deferred().await; // prints exactly once: Int(0) -> Int(2)
//! ```

pub mod error;
pub mod observe;
pub mod owner;
pub mod reactive;

pub use error::{CoreError, DynError};
pub use observe::{ObservedList, ObservedMap, Value};
pub use owner::{ErrorSink, Owner, UpdatedHook};
pub use reactive::{
    next_tick, next_tick_deferred, queue_watcher, with_macro_task, Dep, DepId, TargetStack,
    TickFuture, WatchCallback, WatchGetter, WatchSource, Watcher, WatcherConfig, WatcherId,
    MAX_UPDATE_DEPTH,
};
