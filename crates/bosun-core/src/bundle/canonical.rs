//! Canonical JSON encoding.
//!
//! Object keys are emitted in sorted order with compact separators, so two
//! logically equal values always encode to the same bytes.

use serde::Serialize;
use serde_json::{Map, Value};

/// Encode `value` as canonical JSON bytes.
pub fn to_canonical_vec<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let value = sorted(serde_json::to_value(value)?);
    serde_json::to_vec(&value)
}

/// Encode `value` as a canonical JSON string.
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let value = sorted(serde_json::to_value(value)?);
    serde_json::to_string(&value)
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (key, value) in entries {
                out.insert(key, sorted(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}
