//! Parameter matching and response validity rules.
//!
//! Lookups use JSON containment: a stored parameter map matches a query when
//! it holds every queried key with an equal value. Extra stored keys are
//! ignored, so a narrower query can hit a broader entry. Writes and
//! invalidations use exact equality instead.

use serde_json::Value;

use crate::types::Parameters;

/// Whether `stored` contains every key/value pair of `query`.
///
/// Nested objects are compared by containment as well; any other value
/// (including arrays) must be equal.
pub fn contains(stored: &Parameters, query: &Parameters) -> bool {
    query.iter().all(|(key, wanted)| {
        stored
            .get(key)
            .is_some_and(|have| value_contains(have, wanted))
    })
}

fn value_contains(have: &Value, wanted: &Value) -> bool {
    match (have, wanted) {
        (Value::Object(have), Value::Object(wanted)) => contains(have, wanted),
        _ => have == wanted,
    }
}

/// `null`, `{}` and `[]` are never worth caching.
pub fn is_empty_response(response: &Value) -> bool {
    match response {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
