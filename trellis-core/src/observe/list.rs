//! Observed lists.
//!
//! An [`ObservedList`] carries a single structural [`Dep`] rather than one per
//! index: element reads register on the structural dep, and every mutation
//! notifies it. Index-granular tracking is not worth the bookkeeping for the
//! mutation patterns lists see (append, remove, splice), which shift the
//! meaning of indices anyway.

use std::sync::Arc;

use parking_lot::RwLock;

use super::value::Value;
use crate::error::CoreError;
use crate::reactive::{Dep, DepId};

struct ListInner {
    dep: Dep,
    items: RwLock<Vec<Value>>,
    inert: bool,
}

/// A reactive sequence container.
///
/// Cloning an `ObservedList` creates a new handle to the **same** container.
#[derive(Clone)]
pub struct ObservedList {
    inner: Arc<ListInner>,
}

impl ObservedList {
    /// Create an empty observed list.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Create an exempt list: reads are untracked and writes notify nobody.
    pub fn inert() -> Self {
        Self::build(true)
    }

    fn build(inert: bool) -> Self {
        Self {
            inner: Arc::new(ListInner {
                dep: Dep::new(),
                items: RwLock::new(Vec::new()),
                inert,
            }),
        }
    }

    pub fn is_inert(&self) -> bool {
        self.inner.inert
    }

    /// Whether two handles refer to the same container.
    pub fn ptr_eq(&self, other: &ObservedList) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// ID of the structural dep; used by deep traversal for cycle detection.
    pub fn dep_id(&self) -> DepId {
        self.inner.dep.id()
    }

    /// Read an element, registering on the structural dep.
    ///
    /// Out of bounds yields [`Value::Null`]; the read still registers, so
    /// growth re-fires the watcher.
    pub fn get(&self, index: usize) -> Value {
        if !self.inner.inert {
            self.inner.dep.depend();
        }
        let items = self.inner.items.read();
        match items.get(index) {
            Some(value) => {
                if !self.inner.inert {
                    match value {
                        Value::Map(map) => map.structural_depend(),
                        Value::List(list) => list.structural_depend_deep(),
                        _ => {}
                    }
                }
                value.clone()
            }
            None => Value::Null,
        }
    }

    /// Overwrite an element and notify.
    ///
    /// Identical values (and NaN over NaN) are skipped; an out-of-bounds
    /// index is ignored with a warning.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), CoreError> {
        let value = value.into();
        {
            let mut items = self.inner.items.write();
            match items.get_mut(index) {
                Some(slot) => {
                    if value.same_as(slot) || (value.is_nan() && slot.is_nan()) {
                        return Ok(());
                    }
                    *slot = value;
                }
                None => {
                    tracing::warn!(index, len = items.len(), "list set out of bounds, ignored");
                    return Ok(());
                }
            }
        }
        self.notify_structural()
    }

    /// Append an element and notify.
    pub fn push(&self, value: impl Into<Value>) -> Result<(), CoreError> {
        self.inner.items.write().push(value.into());
        self.notify_structural()
    }

    /// Remove and return the last element, notifying when one existed.
    pub fn pop(&self) -> Result<Option<Value>, CoreError> {
        let popped = self.inner.items.write().pop();
        if popped.is_some() {
            self.notify_structural()?;
        }
        Ok(popped)
    }

    /// Insert an element at `index` (clamped to the current length) and
    /// notify.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<(), CoreError> {
        {
            let mut items = self.inner.items.write();
            let index = index.min(items.len());
            items.insert(index, value.into());
        }
        self.notify_structural()
    }

    /// Remove and return the element at `index`, notifying when one existed.
    pub fn remove(&self, index: usize) -> Result<Option<Value>, CoreError> {
        let removed = {
            let mut items = self.inner.items.write();
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        };
        if removed.is_some() {
            self.notify_structural()?;
        }
        Ok(removed)
    }

    /// Drop every element and notify.
    pub fn clear(&self) -> Result<(), CoreError> {
        let was_empty = {
            let mut items = self.inner.items.write();
            let was_empty = items.is_empty();
            items.clear();
            was_empty
        };
        if was_empty {
            Ok(())
        } else {
            self.notify_structural()
        }
    }

    pub fn len(&self) -> usize {
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.read().is_empty()
    }

    /// Untracked copy of the current elements, for serialization.
    pub fn snapshot(&self) -> Vec<Value> {
        self.inner.items.read().clone()
    }

    /// Append without notification; used while building trees that have no
    /// subscribers yet.
    pub(crate) fn push_untracked(&self, value: Value) {
        self.inner.items.write().push(value);
    }

    /// Register the structural dep with the active watcher.
    pub(crate) fn structural_depend(&self) {
        if !self.inner.inert {
            self.inner.dep.depend();
        }
    }

    /// Register this list and every nested container reachable through it.
    ///
    /// Element containers cannot be reached through per-slot deps (lists have
    /// none), so a read of the list subscribes to their structure too.
    pub(crate) fn structural_depend_deep(&self) {
        if self.inner.inert {
            return;
        }
        self.inner.dep.depend();
        let items = self.inner.items.read();
        for item in items.iter() {
            match item {
                Value::Map(map) => map.structural_depend(),
                Value::List(list) => list.structural_depend_deep(),
                _ => {}
            }
        }
    }

    fn notify_structural(&self) -> Result<(), CoreError> {
        if self.inner.inert {
            Ok(())
        } else {
            self.inner.dep.notify()
        }
    }
}

impl Default for ObservedList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObservedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedList")
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
    fn push_get_pop_round_trip() {
        let list = ObservedList::new();
        assert!(list.is_empty());

        list.push(1i64).unwrap();
        list.push(2i64).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0).as_int(), Some(1));
        assert_eq!(list.get(1).as_int(), Some(2));
        assert!(list.get(5).is_null());

        assert_eq!(list.pop().unwrap().and_then(|v| v.as_int()), Some(2));
        assert_eq!(list.len(), 1);
        assert!(ObservedList::new().pop().unwrap().is_none());
    }

    #[test]
    fn insert_and_remove_shift_elements() {
        let list = ObservedList::new();
        list.push(1i64).unwrap();
        list.push(3i64).unwrap();
        list.insert(1, 2i64).unwrap();

        assert_eq!(list.snapshot().len(), 3);
        assert_eq!(list.get(1).as_int(), Some(2));

        assert_eq!(list.remove(0).unwrap().and_then(|v| v.as_int()), Some(1));
        assert_eq!(list.get(0).as_int(), Some(2));
        assert!(list.remove(10).unwrap().is_none());
    }

    #[test]
    fn set_out_of_bounds_is_ignored() {
        let list = ObservedList::new();
        list.push(1i64).unwrap();
        list.set(7, 9i64).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0).as_int(), Some(1));
    }

    #[test]
    fn clone_shares_the_container() {
        let list = ObservedList::new();
        let alias = list.clone();
        list.push(1i64).unwrap();
        assert_eq!(alias.len(), 1);
        assert!(list.ptr_eq(&alias));
    }
}
