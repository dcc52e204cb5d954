//! Deep merge of partial JSON updates.
//!
//! One pure function with a fixed contract, used for every entity family:
//!
//! - `null` deletes the key,
//! - objects merge recursively (untouched nested fields survive),
//! - arrays replace positionally: index `i` of the incoming array
//!   overwrites index `i` of the existing one, existing elements beyond
//!   the incoming length are kept,
//! - any other value overwrites.
//!
//! Nulls nested inside newly inserted values are dropped too, so the
//! canonical form never holds a `null` member.
//!
//! Merging the same partial twice gives the same result as merging it once.

use serde_json::{Map, Value};

/// Merge `incoming` into `existing`, returning the merged value.
pub fn deep_merge(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(patch)) => Value::Object(merge_objects(base, patch)),
        (Value::Array(base), Value::Array(patch)) => Value::Array(merge_arrays(base, patch)),
        _ => prune(incoming),
    }
}

/// Copy `value` without null object members.
fn prune(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), prune(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(prune).collect()),
        other => other.clone(),
    }
}

fn merge_objects(base: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (key, value) in patch {
        if value.is_null() {
            out.remove(key);
            continue;
        }
        let merged = match out.get(key) {
            Some(current) => deep_merge(current, value),
            None => prune(value),
        };
        out.insert(key.clone(), merged);
    }
    out
}

fn merge_arrays(base: &[Value], patch: &[Value]) -> Vec<Value> {
    let mut out: Vec<Value> = patch.iter().map(prune).collect();
    if base.len() > patch.len() {
        out.extend(base.iter().skip(patch.len()).cloned());
    }
    out
}
