//! Dependency objects.
//!
//! A [`Dep`] represents one observable slot and owns the slot's current
//! subscriber set. Reading the slot inside a tracked evaluation calls
//! [`Dep::depend`], which registers the subscription through the active
//! watcher; writing the slot calls [`Dep::notify`], which pushes an update to
//! every subscriber.
//!
//! The subscriber list never keeps a watcher alive past teardown: a watcher
//! removes itself from every dep it holds when it is torn down, and the dep
//! side performs no cleanup of its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::context::TargetStack;
use super::watcher::Watcher;
use crate::error::CoreError;

/// Counter for generating unique dep IDs.
static DEP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    fn next() -> Self {
        Self(DEP_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

struct DepInner {
    id: DepId,
    /// Subscribers in insertion order. Most slots have a handful of
    /// subscribers, so the list is inlined.
    subs: RwLock<SmallVec<[Watcher; 4]>>,
}

/// One observable slot and its subscriber set.
///
/// Cloning a `Dep` creates a new handle to the **same** slot.
#[derive(Clone)]
pub struct Dep {
    inner: Arc<DepInner>,
}

impl Dep {
    /// Create a dep for a newly observed slot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DepInner {
                id: DepId::next(),
                subs: RwLock::new(SmallVec::new()),
            }),
        }
    }

    /// Get the dep's unique ID.
    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Add a watcher to the subscriber set.
    ///
    /// Callers guard against duplicates per evaluation pass; see
    /// [`Watcher::add_dep`].
    pub fn add_sub(&self, watcher: &Watcher) {
        self.inner.subs.write().push(watcher.clone());
    }

    /// Remove a watcher from the subscriber set.
    pub fn remove_sub(&self, watcher: &Watcher) {
        self.inner
            .subs
            .write()
            .retain(|sub| sub.id() != watcher.id());
    }

    /// Register this dep with the currently evaluating watcher, if any.
    ///
    /// This is how reading a slot during evaluation creates a subscription.
    pub fn depend(&self) {
        if let Some(target) = TargetStack::current() {
            target.add_dep(self);
        }
    }

    /// Notify every subscriber that the slot changed.
    ///
    /// The subscriber list is snapshotted first so callbacks that mutate the
    /// subscription graph mid-notification iterate safely, and the snapshot is
    /// sorted by watcher ID so synchronous subscribers fire in creation order.
    /// Queued subscribers are ordered again by the scheduler at flush time.
    pub fn notify(&self) -> Result<(), CoreError> {
        let mut snapshot: SmallVec<[Watcher; 4]> = self.inner.subs.read().clone();
        snapshot.sort_by_key(|sub| sub.id());
        for sub in &snapshot {
            sub.update()?;
        }
        Ok(())
    }

    /// Get the number of current subscribers.
    pub fn sub_count(&self) -> usize {
        self.inner.subs.read().len()
    }

    /// Whether two handles refer to the same slot.
    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("sub_count", &self.sub_count())
            .finish()
    }
}
