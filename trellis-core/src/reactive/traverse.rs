//! Deep traversal for deep watchers.
//!
//! Visits every nested slot of a value while an evaluation is active, so each
//! read registers a dependency and the watcher re-fires on nested mutation
//! even though the outer value's identity never changes.

use std::collections::HashSet;

use crate::observe::Value;

/// Recursively read every slot reachable from `value`.
///
/// Container dep IDs already visited are skipped, so cyclic structures
/// terminate.
pub(crate) fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_value(value, &mut seen);
}

fn traverse_value(value: &Value, seen: &mut HashSet<u64>) {
    match value {
        Value::Map(map) => {
            if !seen.insert(map.dep_id().raw()) {
                return;
            }
            map.structural_depend();
            for key in map.keys() {
                traverse_value(&map.get(&key), seen);
            }
        }
        Value::List(list) => {
            if !seen.insert(list.dep_id().raw()) {
                return;
            }
            list.structural_depend();
            for index in 0..list.len() {
                traverse_value(&list.get(index), seen);
            }
        }
        _ => {}
    }
}
