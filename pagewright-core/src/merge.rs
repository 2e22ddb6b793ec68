//! Deep merge of attribute mappings.
//!
//! Mappings merge key by key: nested maps merge recursively, arrays
//! concatenate, and anything else is replaced by the later value. An explicit
//! `Null` in the later operand replaces the inherited value, which typed
//! accessors then treat as absent.

use pagewright_types::{Attrs, Value};

/// Merge `b` over `a`, returning a new mapping
pub fn merge(a: &Attrs, b: &Attrs) -> Attrs {
    let mut out = a.clone();
    for (key, incoming) in b {
        let merged = match out.get(key) {
            Some(existing) => merge_value(existing, incoming),
            None => incoming.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

/// Merge any number of mappings, later layers winning
pub fn merge_all<'a>(layers: impl IntoIterator<Item = &'a Attrs>) -> Attrs {
    layers
        .into_iter()
        .fold(Attrs::new(), |acc, layer| merge(&acc, layer))
}

/// Merge two values using the same rules as [`merge`]
pub fn merge_value(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Map(x), Value::Map(y)) => Value::Map(merge(x, y)),
        // The very same shared array on both sides is a no-op merge
        (Value::Array(_), Value::Array(_)) if a.same_array(b) => a.clone(),
        (Value::Array(x), Value::Array(y)) => {
            Value::array(x.iter().cloned().chain(y.iter().cloned()))
        }
        _ => b.clone(),
    }
}
