//! Watcher owners.
//!
//! An [`Owner`] is the component-instance contract the reactive core is
//! written against: a root observed data map, a registry of the watchers
//! bound to it, an optional primary (render) watcher, lifecycle flags, and an
//! error sink. The wider framework owns real component state; this type
//! carries exactly the pieces the core consumes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::CoreError;
use crate::observe::ObservedMap;
use crate::reactive::watcher::{WatchCallback, WatchSource, Watcher, WatcherConfig};

/// Receives errors raised by this owner's user watchers.
pub type ErrorSink = Arc<dyn Fn(&CoreError) + Send + Sync>;

/// Invoked after a flush in which the owner's primary watcher ran.
pub type UpdatedHook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct OwnerInner {
    data: ObservedMap,
    /// Every watcher bound to this owner, in creation order.
    watchers: Mutex<Vec<Watcher>>,
    /// The render watcher, when one has been registered.
    primary: RwLock<Option<Watcher>>,
    mounted: AtomicBool,
    destroying: AtomicBool,
    updated: RwLock<Option<UpdatedHook>>,
    error_sink: RwLock<Option<ErrorSink>>,
}

/// The owning side of a set of watchers.
///
/// Cloning an `Owner` creates a new handle to the **same** owner.
#[derive(Clone)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

impl Owner {
    /// Create an owner with an empty root data map.
    pub fn new() -> Self {
        Self::with_data(ObservedMap::new())
    }

    /// Create an owner around an existing observed map.
    pub fn with_data(data: ObservedMap) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                data,
                watchers: Mutex::new(Vec::new()),
                primary: RwLock::new(None),
                mounted: AtomicBool::new(false),
                destroying: AtomicBool::new(false),
                updated: RwLock::new(None),
                error_sink: RwLock::new(None),
            }),
        }
    }

    /// The root observed data map watchers evaluate against.
    pub fn data(&self) -> &ObservedMap {
        &self.inner.data
    }

    /// Register a user watcher.
    ///
    /// The `user` flag is forced on: evaluator and callback errors are routed
    /// to this owner's error sink rather than propagating.
    pub fn watch(
        &self,
        source: WatchSource,
        callback: WatchCallback,
        config: WatcherConfig,
    ) -> Result<Watcher, CoreError> {
        let config = WatcherConfig {
            user: true,
            ..config
        };
        Watcher::new(self, source, Some(callback), config, false)
    }

    /// Install a custom error sink. Without one, errors log through
    /// `tracing::error!`.
    pub fn set_error_sink<F>(&self, sink: F)
    where
        F: Fn(&CoreError) + Send + Sync + 'static,
    {
        *self.inner.error_sink.write() = Some(Arc::new(sink));
    }

    /// Install the post-flush hook invoked after this owner's primary watcher
    /// runs in a flush.
    pub fn on_updated<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.updated.write() = Some(Arc::new(hook));
    }

    /// Route an error to the sink.
    pub fn report(&self, err: &CoreError) {
        // Clone the handle out so the sink runs without the lock held.
        let sink = self.inner.error_sink.read().clone();
        match sink {
            Some(sink) => sink(err),
            None => tracing::error!(error = %err, "watcher error"),
        }
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.inner.mounted.store(mounted, Ordering::SeqCst);
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    pub fn is_destroying(&self) -> bool {
        self.inner.destroying.load(Ordering::SeqCst)
    }

    /// Number of watchers currently registered.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }

    /// Tear down every watcher bound to this owner.
    ///
    /// Idempotent. The destroying flag is raised first so each teardown skips
    /// the per-watcher registry removal; the registry is dropped wholesale.
    pub fn destroy(&self) {
        if self.inner.destroying.swap(true, Ordering::SeqCst) {
            return;
        }
        let primary = self.inner.primary.write().take();
        if let Some(primary) = primary {
            primary.teardown();
        }
        let watchers = std::mem::take(&mut *self.inner.watchers.lock());
        for watcher in &watchers {
            watcher.teardown();
        }
        self.inner.mounted.store(false, Ordering::SeqCst);
    }

    pub(crate) fn register_watcher(&self, watcher: &Watcher, primary: bool) {
        // Same lock order as remove_watcher: registry first, then primary.
        self.inner.watchers.lock().push(watcher.clone());
        if primary {
            *self.inner.primary.write() = Some(watcher.clone());
        }
    }

    pub(crate) fn remove_watcher(&self, watcher: &Watcher) {
        self.inner
            .watchers
            .lock()
            .retain(|registered| registered.id() != watcher.id());
        let mut primary = self.inner.primary.write();
        if primary.as_ref().is_some_and(|p| p.id() == watcher.id()) {
            *primary = None;
        }
    }

    pub(crate) fn is_primary(&self, watcher: &Watcher) -> bool {
        self.inner
            .primary
            .read()
            .as_ref()
            .is_some_and(|p| p.id() == watcher.id())
    }

    pub(crate) fn call_updated(&self) {
        let hook = self.inner.updated.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<OwnerInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<OwnerInner>) -> Owner {
        Owner { inner }
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owner")
            .field("watcher_count", &self.watcher_count())
            .field("mounted", &self.is_mounted())
            .field("destroying", &self.is_destroying())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Value;

    fn noop_callback() -> WatchCallback {
        Arc::new(|_owner, _new, _old| Ok(()))
    }

    fn sync_config() -> WatcherConfig {
        WatcherConfig {
            sync: true,
            ..Default::default()
        }
    }

    #[test]
    fn watch_registers_a_user_watcher() {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let watcher = owner
            .watch(WatchSource::path("x"), noop_callback(), sync_config())
            .unwrap();

        assert_eq!(owner.watcher_count(), 1);
        assert!(watcher.active());
        assert_eq!(watcher.value().as_int(), Some(1));
    }

    #[test]
    fn teardown_removes_the_watcher_from_the_registry() {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let watcher = owner
            .watch(WatchSource::path("x"), noop_callback(), sync_config())
            .unwrap();
        assert_eq!(owner.watcher_count(), 1);

        watcher.teardown();
        assert_eq!(owner.watcher_count(), 0);
    }

    #[test]
    fn destroy_tears_down_every_watcher() {
        let owner = Owner::new();
        owner.data().set("x", 1i64).unwrap();

        let record = Arc::new(parking_lot::Mutex::new(0u32));
        let record_in_cb = Arc::clone(&record);
        let first = owner
            .watch(
                WatchSource::path("x"),
                Arc::new(move |_owner, _new, _old| {
                    *record_in_cb.lock() += 1;
                    Ok(())
                }),
                sync_config(),
            )
            .unwrap();
        let second = owner
            .watch(WatchSource::path("x"), noop_callback(), sync_config())
            .unwrap();

        owner.destroy();
        assert!(!first.active());
        assert!(!second.active());
        assert_eq!(owner.watcher_count(), 0);

        // Destroy again: no-op.
        owner.destroy();

        // Mutations after destroy notify nobody.
        owner.data().set("x", Value::Int(99)).unwrap();
        assert_eq!(*record.lock(), 0);
    }

    #[test]
    fn report_prefers_the_custom_sink() {
        let owner = Owner::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_in_sink = Arc::clone(&seen);
        owner.set_error_sink(move |err| seen_in_sink.lock().push(err.to_string()));

        owner.report(&CoreError::BadPath {
            path: "a-b".to_owned(),
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("a-b"));
    }
}
