//! Order-independent hashing for JSON values
//!
//! `serde_json::Value` implements `Eq` but not `Hash`. Object keys are hashed
//! in sorted order so the result does not depend on map iteration order,
//! which keeps `Hash` consistent with `Eq` whichever map backend serde_json
//! was compiled with.

use serde_json::Value;
use std::hash::{Hash, Hasher};

/// Feed a JSON value into `state` in canonical form.
pub fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            n.to_string().hash(state);
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries.len().hash(state);
            for (key, item) in entries {
                key.hash(state);
                hash_value(item, state);
            }
        }
    }
}
