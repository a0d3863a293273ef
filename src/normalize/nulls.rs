//! Null normalization and key alignment.
//!
//! Null-like values (null, NaN, blank, `"null"`, `"none"`) collapse to
//! `Value::Null`. A list made only of records is treated as a record set and
//! every member is rebuilt over the union of the set's keys.

use crate::types::{key_union, Record};
use serde_json::Value;

/// True for null, NaN and strings that trim to `""`, `"null"` or `"none"`
/// (any case).
///
/// `serde_json` turns non-finite floats into null on construction, so the NaN
/// arm only matters for numbers built through other means.
pub fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Number(n) => n.as_f64().is_some_and(f64::is_nan),
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("none")
        }
        _ => false,
    }
}

/// Normalize a record, a list, a record set or a scalar. Never fails.
pub fn normalize_nulls(data: &Value) -> Value {
    match data {
        v if is_null_like(v) => Value::Null,
        Value::Object(record) => Value::Object(normalize_record(record)),
        Value::Array(items) => Value::Array(normalize_list(items)),
        other => other.clone(),
    }
}

/// Normalize every field of one record. No key alignment at this scope.
pub fn normalize_record(record: &Record) -> Record {
    record
        .iter()
        .map(|(key, value)| (key.clone(), normalize_field(value)))
        .collect()
}

/// Align a table: every row is rebuilt over the union of all rows' keys,
/// missing keys filled with null, present values normalized.
pub fn align_records(records: &[Record]) -> Vec<Record> {
    let keys = key_union(records);
    records
        .iter()
        .map(|record| {
            keys.iter()
                .map(|key| {
                    let value = record.get(key).map_or(Value::Null, normalize_field);
                    (key.clone(), value)
                })
                .collect()
        })
        .collect()
}

/// Substitute `sentinel` for every null, at any depth
pub fn replace_nulls(value: Value, sentinel: &Value) -> Value {
    match value {
        Value::Null => sentinel.clone(),
        Value::Object(record) => Value::Object(replace_nulls_in_record(record, sentinel)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| replace_nulls(item, sentinel))
                .collect(),
        ),
        other => other,
    }
}

pub fn replace_nulls_in_record(record: Record, sentinel: &Value) -> Record {
    record
        .into_iter()
        .map(|(key, value)| (key, replace_nulls(value, sentinel)))
        .collect()
}

fn normalize_list(items: &[Value]) -> Vec<Value> {
    if !items.is_empty() && items.iter().all(Value::is_object) {
        let records: Vec<Record> = items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect();
        return align_records(&records)
            .into_iter()
            .map(Value::Object)
            .collect();
    }

    // Empty containers inside a mixed list are noise
    items
        .iter()
        .map(normalize_nulls)
        .filter(|item| !is_empty_container(item))
        .collect()
}

/// A record field never holds an empty record or list: those become null
fn normalize_field(value: &Value) -> Value {
    let normalized = normalize_nulls(value);
    if is_empty_container(&normalized) {
        Value::Null
    } else {
        normalized
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(record) => record.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_like_values_collapse() {
        for input in [json!(null), json!(f64::NAN), json!("null"), json!("NONE"), json!(""), json!("  ")] {
            assert_eq!(normalize_nulls(&input), Value::Null, "input: {input}");
        }
        assert_eq!(normalize_nulls(&json!(" None ")), Value::Null);
        assert_eq!(normalize_nulls(&json!("nothing")), json!("nothing"));
        assert_eq!(normalize_nulls(&json!(0)), json!(0));
        assert_eq!(normalize_nulls(&json!(false)), json!(false));
    }

    #[test]
    fn test_key_union_law() {
        let out = normalize_nulls(&json!([{"a": 1}, {"b": 2}]));
        assert_eq!(out, json!([{"a": 1, "b": null}, {"a": null, "b": 2}]));

        let rows = out.as_array().unwrap();
        let keys0: Vec<&String> = rows[0].as_object().unwrap().keys().collect();
        let keys1: Vec<&String> = rows[1].as_object().unwrap().keys().collect();
        assert_eq!(keys0, keys1);
        assert_eq!(keys0, vec!["a", "b"]);
    }

    #[test]
    fn test_alignment_normalizes_present_values() {
        let out = normalize_nulls(&json!([{"a": "null", "c": {}}, {"b": "x"}]));
        assert_eq!(out, json!([{"a": null, "c": null, "b": null}, {"a": null, "c": null, "b": "x"}]));
    }

    #[test]
    fn test_single_record_is_not_aligned() {
        let out = normalize_nulls(&json!({"a": "none", "b": {"c": ""}, "d": [], "e": 3}));
        assert_eq!(out, json!({"a": null, "b": {"c": null}, "d": null, "e": 3}));
    }

    #[test]
    fn test_nested_record_sets_are_aligned() {
        let out = normalize_nulls(&json!({"items": [{"x": 1}, {"y": 2}]}));
        assert_eq!(out, json!({"items": [{"x": 1, "y": null}, {"x": null, "y": 2}]}));
    }

    #[test]
    fn test_mixed_lists_are_element_wise() {
        let out = normalize_nulls(&json!([1, "null", {"a": 1}, [], {}]));
        assert_eq!(out, json!([1, null, {"a": 1}]));
    }

    #[test]
    fn test_empty_list_passes_through() {
        assert_eq!(normalize_nulls(&json!([])), json!([]));
    }

    #[test]
    fn test_replace_nulls() {
        let out = replace_nulls(json!({"a": null, "b": [null, 1], "c": "x"}), &json!("N/A"));
        assert_eq!(out, json!({"a": "N/A", "b": ["N/A", 1], "c": "x"}));
    }
}
