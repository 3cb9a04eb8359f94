//! Observed maps.
//!
//! An [`ObservedMap`] is a string-keyed container where every key owns a
//! [`Dep`]. Reading a key inside a tracked evaluation subscribes the active
//! watcher to that key; writing the key notifies its subscribers. A second,
//! structural dep covers the container's shape: key insertion and removal
//! notify it, and reads that depend on the shape (missing keys, deep
//! traversal) register on it.
//!
//! Wrapping is idempotent by construction: containers are born observed and
//! [`Value`] stores the observed handles directly, so a value can never be
//! wrapped twice.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::value::Value;
use crate::error::CoreError;
use crate::reactive::{Dep, DepId};

struct Slot {
    dep: Dep,
    value: Value,
}

struct MapInner {
    /// Structural dep: notified on key insertion/removal, depended on by
    /// shape-sensitive reads.
    dep: Dep,
    entries: RwLock<IndexMap<String, Slot>>,
    /// Inert maps neither track reads nor notify writes.
    inert: bool,
}

/// A reactive string-keyed container.
///
/// Cloning an `ObservedMap` creates a new handle to the **same** container.
#[derive(Clone)]
pub struct ObservedMap {
    inner: Arc<MapInner>,
}

impl ObservedMap {
    /// Create an empty observed map.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Create an exempt map: reads are untracked and writes notify nobody.
    ///
    /// The analogue of marking a structure non-reactive (or freezing it) in
    /// the host convention this layer is modeled on.
    pub fn inert() -> Self {
        Self::build(true)
    }

    fn build(inert: bool) -> Self {
        Self {
            inner: Arc::new(MapInner {
                dep: Dep::new(),
                entries: RwLock::new(IndexMap::new()),
                inert,
            }),
        }
    }

    pub fn is_inert(&self) -> bool {
        self.inner.inert
    }

    /// Whether two handles refer to the same container.
    pub fn ptr_eq(&self, other: &ObservedMap) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// ID of the structural dep; used by deep traversal for cycle detection.
    pub fn dep_id(&self) -> DepId {
        self.inner.dep.id()
    }

    /// Read a key, registering a dependency when an evaluation is active.
    ///
    /// Reading a key that holds a container also registers on the child's
    /// structural dep, so structural mutation of the child re-fires watchers
    /// that read it through this slot. Reading a missing key registers on
    /// this map's structural dep, so inserting the key later re-fires.
    pub fn get(&self, key: &str) -> Value {
        let entries = self.inner.entries.read();
        match entries.get(key) {
            Some(slot) => {
                if !self.inner.inert {
                    slot.dep.depend();
                    match &slot.value {
                        Value::Map(map) => map.structural_depend(),
                        Value::List(list) => list.structural_depend_deep(),
                        _ => {}
                    }
                }
                slot.value.clone()
            }
            None => {
                if !self.inner.inert {
                    self.inner.dep.depend();
                }
                Value::Null
            }
        }
    }

    /// Write a key and notify subscribers.
    ///
    /// An identical value is skipped entirely (identity for containers, `==`
    /// for primitives, and a NaN overwritten by NaN counts as identical — the
    /// write guard, unlike run-time change detection, treats NaN as stable).
    /// Inserting a previously absent key notifies the structural dep instead
    /// of a key dep.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), CoreError> {
        let value = value.into();
        let notify_dep;
        {
            let mut entries = self.inner.entries.write();
            match entries.get_mut(key) {
                Some(slot) => {
                    if value.same_as(&slot.value) || (value.is_nan() && slot.value.is_nan()) {
                        return Ok(());
                    }
                    slot.value = value;
                    notify_dep = slot.dep.clone();
                }
                None => {
                    entries.insert(
                        key.to_owned(),
                        Slot {
                            dep: Dep::new(),
                            value,
                        },
                    );
                    notify_dep = self.inner.dep.clone();
                }
            }
        }
        if self.inner.inert {
            return Ok(());
        }
        notify_dep.notify()
    }

    /// Remove a key, notifying both its dep and the structural dep.
    pub fn remove(&self, key: &str) -> Result<Option<Value>, CoreError> {
        let removed = self.inner.entries.write().shift_remove(key);
        match removed {
            Some(slot) => {
                if !self.inner.inert {
                    slot.dep.notify()?;
                    self.inner.dep.notify()?;
                }
                Ok(Some(slot.value))
            }
            None => Ok(None),
        }
    }

    /// Whether the key is present. Registers on the structural dep.
    pub fn contains_key(&self, key: &str) -> bool {
        if !self.inner.inert {
            self.inner.dep.depend();
        }
        self.inner.entries.read().contains_key(key)
    }

    /// Current keys in insertion order. Untracked.
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Untracked copy of the current entries, for serialization.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.value.clone()))
            .collect()
    }

    /// Insert without identity checks or notification; used while building
    /// trees that have no subscribers yet.
    pub(crate) fn set_untracked(&self, key: &str, value: Value) {
        self.inner.entries.write().insert(
            key.to_owned(),
            Slot {
                dep: Dep::new(),
                value,
            },
        );
    }

    /// Register the structural dep with the active watcher.
    pub(crate) fn structural_depend(&self) {
        if !self.inner.inert {
            self.inner.dep.depend();
        }
    }
}

impl Default for ObservedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObservedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedMap")
            .field("dep_id", &self.dep_id())
            .field("len", &self.len())
            .field("inert", &self.inner.inert)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set_round_trip() {
        let map = ObservedMap::new();
        assert!(map.get("missing").is_null());

        map.set("x", 1i64).unwrap();
        assert_eq!(map.get("x").as_int(), Some(1));
        assert_eq!(map.len(), 1);

        map.set("x", 2i64).unwrap();
        assert_eq!(map.get("x").as_int(), Some(2));
    }

    #[test]
    fn remove_drops_the_slot() {
        let map = ObservedMap::new();
        map.set("x", 1i64).unwrap();

        let removed = map.remove("x").unwrap();
        assert_eq!(removed.and_then(|v| v.as_int()), Some(1));
        assert!(map.get("x").is_null());
        assert!(map.remove("x").unwrap().is_none());
    }

    #[test]
    fn keys_preserve_insertion_order() {
        let map = ObservedMap::new();
        map.set("b", 1i64).unwrap();
        map.set("a", 2i64).unwrap();
        map.set("c", 3i64).unwrap();

        assert_eq!(map.keys(), vec!["b", "a", "c"]);
    }

    #[test]
    fn clone_shares_the_container() {
        let map = ObservedMap::new();
        let alias = map.clone();

        map.set("x", 42i64).unwrap();
        assert_eq!(alias.get("x").as_int(), Some(42));
        assert!(map.ptr_eq(&alias));
    }

    #[test]
    fn inert_map_stores_without_reacting() {
        let map = ObservedMap::inert();
        map.set("x", 1i64).unwrap();
        assert_eq!(map.get("x").as_int(), Some(1));
        assert!(map.is_inert());
    }
}
