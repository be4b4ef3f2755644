//! `KEY=VALUE` flag folding.
//!
//! Each occurrence of a repeatable flag (`-e`, `--tool-arg`) is folded into an
//! ordered map. Malformed pairs are dropped without an error.

use indexmap::IndexMap;
use serde_json::Value;

/// Splits `input` on its first `=` and returns the non-empty key and value.
fn split_pair(input: &str) -> Option<(&str, &str)> {
    let (key, value) = input.split_once('=')?;
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Folds one `KEY=VALUE` occurrence into `acc`.
///
/// A later value for the same key overwrites the earlier one but keeps the
/// key's first-seen position. Input without `=`, or with an empty key or value,
/// leaves `acc` unchanged.
pub fn parse_key_value(input: &str, mut acc: IndexMap<String, String>) -> IndexMap<String, String> {
    match split_pair(input) {
        Some((key, value)) => {
            acc.insert(key.to_string(), value.to_string());
        }
        None => tracing::debug!(pair = input, "dropping malformed KEY=VALUE pair"),
    }
    acc
}

/// Same contract as [`parse_key_value`], with the value coerced to JSON.
pub fn parse_tool_arg(input: &str, mut acc: IndexMap<String, Value>) -> IndexMap<String, Value> {
    match split_pair(input) {
        Some((key, value)) => {
            acc.insert(key.to_string(), coerce_value(value));
        }
        None => tracing::debug!(pair = input, "dropping malformed tool argument"),
    }
    acc
}

/// `5` becomes a number, `true` a bool, `{"a":1}` an object; anything that is
/// not valid JSON is sent as a plain string.
pub fn coerce_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
