//! Canonical JSON serialization helpers.
//!
//! Object keys are sorted recursively and output is indented with two spaces,
//! so metadata documents and model hashes are stable across runs.

use serde::{ser::Error as SerdeSerError, Serialize};
use serde_json::{self, map::Map, ser::PrettyFormatter, Serializer, Value};
use std::io::Write;

/// Recursively sort JSON object keys to obtain a canonical representation.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, val) in entries {
                sorted.insert(key, canonicalize(val));
            }

            Value::Object(sorted)
        }
        Value::Array(elements) => Value::Array(elements.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serialize a value into canonical JSON and write it to the provided writer.
pub fn write_canonical_json<T, W>(mut writer: W, value: &T) -> std::result::Result<(), serde_json::Error>
where
    T: Serialize,
    W: Write,
{
    let canonical_value = canonicalize(serde_json::to_value(value)?);
    let formatter = PrettyFormatter::with_indent(b"  ");
    let mut serializer = Serializer::with_formatter(&mut writer, formatter);
    canonical_value.serialize(&mut serializer)?;
    Ok(())
}

/// Serialize a value into canonical JSON and return it as a String.
pub fn canonical_json_string<T>(value: &T) -> std::result::Result<String, serde_json::Error>
where
    T: Serialize,
{
    let mut buffer = Vec::new();
    write_canonical_json(&mut buffer, value)?;
    String::from_utf8(buffer).map_err(|err| SerdeSerError::custom(err.to_string()))
}

/// BLAKE3 of arbitrary bytes as lowercase hex
pub fn hash_bytes_hex(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_recursively() {
        let value = json!({"b": 1, "a": {"d": 2, "c": [{"f": 1, "e": 2}]}});
        let out = canonical_json_string(&value).unwrap();
        let a = out.find("\"a\"").unwrap();
        let b = out.find("\"b\"").unwrap();
        let c = out.find("\"c\"").unwrap();
        let d = out.find("\"d\"").unwrap();
        let e = out.find("\"e\"").unwrap();
        let f = out.find("\"f\"").unwrap();
        assert!(a < b && c < d && e < f);
        assert!(out.contains("\n  \"a\""));
    }

    #[test]
    fn test_output_independent_of_insertion_order() {
        let first = json!({"x": 1, "y": 2});
        let mut second = serde_json::Map::new();
        second.insert("y".to_string(), json!(2));
        second.insert("x".to_string(), json!(1));
        let first = canonical_json_string(&first).unwrap();
        let second = canonical_json_string(&Value::Object(second)).unwrap();
        assert_eq!(hash_bytes_hex(first.as_bytes()), hash_bytes_hex(second.as_bytes()));
    }
}
