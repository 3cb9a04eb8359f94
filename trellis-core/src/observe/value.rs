//! Observed values.
//!
//! [`Value`] is the data type flowing through evaluators and callbacks.
//! Primitives are stored inline; maps and lists are handles to shared
//! observed containers, so cloning a `Value` never deep-copies and container
//! equality is handle identity.
//!
//! # Change detection
//!
//! [`Value::same_as`] implements identity comparison: primitives compare by
//! value, containers by pointer. `Float(NAN)` is never equal to itself —
//! watchers producing NaN re-fire on every run. This matches the host
//! convention the binding layer is built around and is intentional.

use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::list::ObservedList;
use super::map::ObservedMap;

/// A value held in an observed slot.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Map(ObservedMap),
    List(ObservedList),
}

impl Value {
    /// Identity comparison.
    ///
    /// Containers compare by handle, so an in-place mutation is invisible
    /// here — deep watchers and the container always-fire rule in
    /// [`Watcher::run`](crate::reactive::Watcher::run) cover that case.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // NaN != NaN, deliberately.
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Whether this is a map or list.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Map(_) | Value::List(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Float(f) if f.is_nan())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ObservedMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObservedList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Build an observed value tree from plain JSON.
    ///
    /// Objects and arrays become live observed containers; every slot of the
    /// result tracks reads and notifies writes.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                let list = ObservedList::new();
                for item in items {
                    list.push_untracked(Value::from_json(item));
                }
                Value::List(list)
            }
            serde_json::Value::Object(fields) => {
                let map = ObservedMap::new();
                for (key, value) in fields {
                    map.set_untracked(key, Value::from_json(value));
                }
                Value::Map(map)
            }
        }
    }

    /// Deep-copy the current state into plain JSON.
    ///
    /// Identity is lost by design; non-finite floats become `null` since JSON
    /// cannot carry them.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::from(s.as_ref()),
            Value::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, value) in map.snapshot() {
                    object.insert(key, value.to_json());
                }
                serde_json::Value::Object(object)
            }
            Value::List(list) => serde_json::Value::Array(
                list.snapshot().iter().map(Value::to_json).collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Map(map) => {
                let entries = map.snapshot();
                let mut state = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in &entries {
                    state.serialize_entry(key, value)?;
                }
                state.end()
            }
            Value::List(list) => {
                let items = list.snapshot();
                let mut state = serializer.serialize_seq(Some(items.len()))?;
                for item in &items {
                    state.serialize_element(item)?;
                }
                state.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<ObservedMap> for Value {
    fn from(map: ObservedMap) -> Self {
        Value::Map(map)
    }
}

impl From<ObservedList> for Value {
    fn from(list: ObservedList) -> Self {
        Value::List(list)
    }
}
