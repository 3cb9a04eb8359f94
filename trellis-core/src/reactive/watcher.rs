//! Watchers.
//!
//! A watcher evaluates an expression, collects the deps the evaluation read,
//! and fires its reaction callback when any of them change. The same type
//! backs all three binding kinds: render watchers (primary, internal),
//! computed watchers (`lazy`), and user watchers registered through
//! [`Owner::watch`](crate::owner::Owner::watch).
//!
//! # Dependency bookkeeping
//!
//! Every evaluation collects deps into a "new" set while the "current" set
//! still reflects the previous evaluation. When the evaluation finishes, the
//! watcher unsubscribes from every dep that was not re-read (so a conditional
//! branch that stopped being taken stops notifying) and the sets swap. Id
//! sets give O(1) duplicate checks so one slot read twice subscribes once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::context::TargetStack;
use super::dep::{Dep, DepId};
use super::scheduler::queue_watcher;
use super::traverse::traverse;
use crate::error::{CoreError, DynError};
use crate::observe::Value;
use crate::owner::{Owner, OwnerInner};

/// Counter for generating unique watcher IDs.
///
/// Creation order defines flush order: watchers created earlier (parents,
/// computed properties) run before watchers created later.
static WATCHER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    fn next() -> Self {
        Self(WATCHER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Evaluator closure: reads reactive state and produces the watched value.
pub type WatchGetter = Arc<dyn Fn(&Owner) -> Result<Value, DynError> + Send + Sync>;

/// Reaction callback, invoked with `(owner, new_value, old_value)`.
pub type WatchCallback = Arc<dyn Fn(&Owner, &Value, &Value) -> Result<(), DynError> + Send + Sync>;

/// Hook invoked just before a queued watcher re-runs during a flush.
pub type BeforeHook = Arc<dyn Fn() + Send + Sync>;

/// What a watcher evaluates: a getter closure or a dot-delimited path
/// resolved against the owner's root data.
#[derive(Clone)]
pub enum WatchSource {
    Getter {
        getter: WatchGetter,
        /// Expression text used in diagnostics.
        label: Option<String>,
    },
    Path(String),
}

impl WatchSource {
    /// Watch the result of a getter closure.
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn(&Owner) -> Result<Value, DynError> + Send + Sync + 'static,
    {
        Self::Getter {
            getter: Arc::new(getter),
            label: None,
        }
    }

    /// Watch a getter closure, labeling it for diagnostics.
    pub fn named<F>(label: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Owner) -> Result<Value, DynError> + Send + Sync + 'static,
    {
        Self::Getter {
            getter: Arc::new(getter),
            label: Some(label.into()),
        }
    }

    /// Watch a dot-delimited path like `"user.address.city"`.
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }
}

/// Watcher configuration flags.
#[derive(Clone, Default)]
pub struct WatcherConfig {
    /// Recursively visit the evaluated value so nested mutations re-fire.
    pub deep: bool,
    /// The evaluator and callback are user code: their errors are routed to
    /// the owner's error sink instead of propagating.
    pub user: bool,
    /// Evaluate on demand (computed watcher): updates only mark dirty.
    pub lazy: bool,
    /// Re-run synchronously inside `notify` instead of queueing.
    pub sync: bool,
    /// Invoked before each scheduled re-run.
    pub before: Option<BeforeHook>,
}

/// Dependency sets for one watcher: the result of the last completed
/// evaluation ("current") and the set being built by an in-progress one
/// ("new").
#[derive(Default)]
struct DepTracker {
    deps: SmallVec<[Dep; 4]>,
    new_deps: SmallVec<[Dep; 4]>,
    dep_ids: HashSet<DepId>,
    new_dep_ids: HashSet<DepId>,
}

struct WatcherInner {
    id: WatcherId,
    /// The owner's registry holds the strong reference; the back-edge is weak
    /// so the pair cannot keep each other alive.
    owner: Weak<OwnerInner>,
    getter: WatchGetter,
    callback: Option<WatchCallback>,
    expression: String,
    deep: bool,
    user: bool,
    lazy: bool,
    sync: bool,
    before: Option<BeforeHook>,
    active: AtomicBool,
    /// Meaningful only for lazy watchers.
    dirty: AtomicBool,
    value: RwLock<Value>,
    deps: Mutex<DepTracker>,
}

/// A tracked computation that re-evaluates when any dep it reads changes.
///
/// Cloning a `Watcher` creates a new handle to the **same** watcher.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher and, unless `lazy`, perform its initial evaluation.
    ///
    /// `primary` registers the watcher as the owner's primary (render)
    /// watcher in addition to the general registry.
    ///
    /// An initial-evaluation failure from an internal (non-user) evaluator is
    /// returned as `Err` and the half-built watcher is torn down; user
    /// evaluator failures are routed to the owner's error sink and the value
    /// starts as [`Value::Null`].
    pub fn new(
        owner: &Owner,
        source: WatchSource,
        callback: Option<WatchCallback>,
        config: WatcherConfig,
        primary: bool,
    ) -> Result<Watcher, CoreError> {
        let (getter, expression) = match source {
            WatchSource::Getter { getter, label } => {
                (getter, label.unwrap_or_else(|| "<fn>".to_owned()))
            }
            WatchSource::Path(path) => match parse_path(&path) {
                Some(segments) => (path_getter(segments), path),
                None => {
                    tracing::warn!(
                        path = %path,
                        "failed watching path: only simple dot-delimited paths are supported; \
                         use a getter function for full control"
                    );
                    (noop_getter(), path)
                }
            },
        };

        let lazy = config.lazy;
        let watcher = Watcher {
            inner: Arc::new(WatcherInner {
                id: WatcherId::next(),
                owner: owner.downgrade(),
                getter,
                callback,
                expression,
                deep: config.deep,
                user: config.user,
                lazy,
                sync: config.sync,
                before: config.before,
                active: AtomicBool::new(true),
                dirty: AtomicBool::new(lazy),
                value: RwLock::new(Value::Null),
                deps: Mutex::new(DepTracker::default()),
            }),
        };

        owner.register_watcher(&watcher, primary);

        if !lazy {
            match watcher.get() {
                Ok(Some(value)) => *watcher.inner.value.write() = value,
                Ok(None) => {}
                Err(err) => {
                    watcher.teardown();
                    return Err(err);
                }
            }
        }

        Ok(watcher)
    }

    /// Get the watcher's unique ID.
    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// The expression text used in diagnostics.
    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    /// The cached value from the last completed evaluation.
    pub fn value(&self) -> Value {
        self.inner.value.read().clone()
    }

    /// Whether a lazy watcher needs re-evaluation.
    pub fn dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// False after teardown.
    pub fn active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Number of deps held from the last completed evaluation.
    pub fn dep_count(&self) -> usize {
        self.inner.deps.lock().deps.len()
    }

    pub(crate) fn owner(&self) -> Option<Owner> {
        self.inner.owner.upgrade().map(Owner::from_inner)
    }

    pub(crate) fn call_before(&self) {
        if let Some(before) = &self.inner.before {
            before();
        }
    }

    /// Evaluate the getter and re-collect dependencies.
    ///
    /// Returns `Ok(None)` when a user evaluator failed: the error has been
    /// routed to the owner's sink and the evaluation yields no new value.
    fn get(&self) -> Result<Option<Value>, CoreError> {
        let Some(owner) = self.owner() else {
            return Ok(None);
        };

        let guard = TargetStack::push(self);
        let evaluated = (self.inner.getter)(&owner);
        let outcome = match evaluated {
            Ok(value) => {
                // Touch every nested slot so they are all tracked as
                // dependencies for deep watching.
                if self.inner.deep {
                    traverse(&value);
                }
                Ok(Some(value))
            }
            Err(source) => {
                let err = CoreError::Evaluation {
                    expression: self.inner.expression.clone(),
                    source,
                };
                if self.inner.user {
                    owner.report(&err);
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        };
        drop(guard);
        self.cleanup_deps();
        outcome
    }

    /// Record a dep read during the in-progress evaluation.
    ///
    /// Subscribes to the dep only if it was not already held by the previous
    /// evaluation, so a re-affirmed subscription is not doubled.
    pub fn add_dep(&self, dep: &Dep) {
        let mut tracker = self.inner.deps.lock();
        let id = dep.id();
        if !tracker.new_dep_ids.contains(&id) {
            tracker.new_dep_ids.insert(id);
            tracker.new_deps.push(dep.clone());
            if !tracker.dep_ids.contains(&id) {
                dep.add_sub(self);
            }
        }
    }

    /// Unsubscribe from deps the latest evaluation no longer reads, then
    /// promote the "new" sets to "current".
    fn cleanup_deps(&self) {
        let mut tracker = self.inner.deps.lock();
        let DepTracker {
            deps,
            new_deps,
            dep_ids,
            new_dep_ids,
        } = &mut *tracker;

        for dep in deps.iter() {
            if !new_dep_ids.contains(&dep.id()) {
                dep.remove_sub(self);
            }
        }

        std::mem::swap(dep_ids, new_dep_ids);
        new_dep_ids.clear();
        std::mem::swap(deps, new_deps);
        new_deps.clear();
    }

    /// Subscriber interface, called when a dep this watcher holds changes.
    pub fn update(&self) -> Result<(), CoreError> {
        if !self.active() {
            return Ok(());
        }
        if self.inner.lazy {
            self.inner.dirty.store(true, Ordering::SeqCst);
            Ok(())
        } else if self.inner.sync {
            self.run()
        } else {
            queue_watcher(self);
            Ok(())
        }
    }

    /// Scheduler job interface: re-evaluate and fire the callback when the
    /// value changed.
    ///
    /// Container values and deep watchers always fire, because in-place
    /// mutation does not change identity.
    pub fn run(&self) -> Result<(), CoreError> {
        if !self.active() {
            return Ok(());
        }
        let Some(value) = self.get()? else {
            return Ok(());
        };
        let old = self.value();
        if !value.same_as(&old) || value.is_container() || self.inner.deep {
            *self.inner.value.write() = value.clone();
            if let Some(callback) = &self.inner.callback {
                let Some(owner) = self.owner() else {
                    return Ok(());
                };
                if let Err(source) = callback(&owner, &value, &old) {
                    let err = CoreError::Callback {
                        expression: self.inner.expression.clone(),
                        source,
                    };
                    if self.inner.user {
                        owner.report(&err);
                    } else {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Force evaluation and clear the dirty flag.
    ///
    /// Only called for lazy watchers, when their value is demanded.
    pub fn evaluate(&self) -> Result<(), CoreError> {
        if let Some(value) = self.get()? {
            *self.inner.value.write() = value;
        }
        self.inner.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Forward every dep this watcher holds to the currently evaluating
    /// watcher.
    ///
    /// Lets a consumer of a lazy watcher's value subscribe to that watcher's
    /// own dependencies transitively.
    pub fn depend(&self) {
        let deps: SmallVec<[Dep; 4]> = self.inner.deps.lock().deps.clone();
        for dep in &deps {
            dep.depend();
        }
    }

    /// Remove self from every dep's subscriber list and deactivate.
    ///
    /// Idempotent. A torn-down watcher already sitting in the scheduler queue
    /// will not run.
    pub fn teardown(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            // Removing from the owner's registry is skipped while the owner
            // itself is being destroyed; the registry is dropped wholesale.
            if let Some(owner) = self.owner() {
                if !owner.is_destroying() {
                    owner.remove_watcher(self);
                }
            }
            let deps = {
                let mut tracker = self.inner.deps.lock();
                tracker.dep_ids.clear();
                tracker.new_dep_ids.clear();
                tracker.new_deps.clear();
                std::mem::take(&mut tracker.deps)
            };
            for dep in &deps {
                dep.remove_sub(self);
            }
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("expression", &self.inner.expression)
            .field("active", &self.active())
            .field("dirty", &self.dirty())
            .field("dep_count", &self.dep_count())
            .finish()
    }
}

/// Parse a dot-delimited path into segments.
///
/// Segments are limited to `[A-Za-z0-9_$]`; anything else bails so typos do
/// not silently watch nothing without a diagnostic.
fn parse_path(path: &str) -> Option<Vec<String>> {
    let segments: Vec<&str> = path.split('.').collect();
    let valid = !segments.is_empty()
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        });
    valid.then(|| segments.into_iter().map(str::to_owned).collect())
}

/// Build a getter that walks the owner's root data through nested maps.
///
/// A missing segment yields [`Value::Null`]; the read still registers on the
/// containing map's structural dep, so inserting the key later re-fires.
fn path_getter(segments: Vec<String>) -> WatchGetter {
    Arc::new(move |owner: &Owner| {
        let mut current = Value::Map(owner.data().clone());
        for segment in &segments {
            current = match current {
                Value::Map(map) => map.get(segment),
                _ => return Ok(Value::Null),
            };
        }
        Ok(current)
    })
}

fn noop_getter() -> WatchGetter {
    Arc::new(|_| Ok(Value::Null))
}
