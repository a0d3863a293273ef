//! Duplicate removal for flat records.
//!
//! A record's key is either its projection onto a list of key fields or the
//! whole record; both are rendered through [`canonical_string`] so container
//! values and key order do not affect equality.

use crate::config::{DedupRule, KeepPolicy};
use crate::types::{canonical_record, canonical_string, Record, Relations};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Deduplication key of `record`
pub fn dedup_key(record: &Record, key_fields: Option<&[String]>) -> String {
    match key_fields {
        Some(fields) => {
            let projection: Vec<Value> = fields
                .iter()
                .map(|field| record.get(field).cloned().unwrap_or(Value::Null))
                .collect();
            canonical_string(&Value::Array(projection))
        }
        None => canonical_record(record),
    }
}

/// Remove duplicates, keeping output order = order of first occurrence.
///
/// With [`KeepPolicy::Last`] a later duplicate replaces the stored row in
/// place.
pub fn deduplicate(
    records: Vec<Record>,
    key_fields: Option<&[String]>,
    keep: KeepPolicy,
) -> Vec<Record> {
    dedup_by(records, keep, |record| dedup_key(record, key_fields))
}

/// Whole-record deduplication through a 64-bit content hash
pub fn deduplicate_by_hash(records: Vec<Record>, keep: KeepPolicy) -> Vec<Record> {
    dedup_by(records, keep, |record| {
        let mut hasher = DefaultHasher::new();
        canonical_record(record).hash(&mut hasher);
        hasher.finish()
    })
}

fn dedup_by<K, F>(records: Vec<Record>, keep: KeepPolicy, key_of: F) -> Vec<Record>
where
    K: Hash + Eq,
    F: Fn(&Record) -> K,
{
    let mut seen: HashMap<K, usize> = HashMap::new();
    let mut result: Vec<Record> = Vec::with_capacity(records.len());

    for record in records {
        let key = key_of(&record);
        match seen.get(&key) {
            None => {
                seen.insert(key, result.len());
                result.push(record);
            }
            Some(&idx) => {
                if keep == KeepPolicy::Last {
                    result[idx] = record;
                }
            }
        }
    }

    result
}

/// Deduplicate every relation table. Tables with a rule use it; the others
/// are deduplicated on the whole record, keeping the first occurrence.
pub fn deduplicate_relations(
    relations: Relations,
    rules: &HashMap<String, DedupRule>,
) -> Relations {
    relations.map_tables(|name, rows| match rules.get(name) {
        Some(rule) => deduplicate(rows, rule.key_fields.as_deref(), rule.keep),
        None => deduplicate(rows, None, KeepPolicy::First),
    })
}

/// Group records by key, returning only groups with more than one member
pub fn find_duplicates(
    records: &[Record],
    key_fields: Option<&[String]>,
) -> HashMap<String, Vec<Record>> {
    let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
    for record in records {
        groups
            .entry(dedup_key(record, key_fields))
            .or_default()
            .push(record.clone());
    }
    groups.retain(|_, group| group.len() > 1);
    groups
}

/// Collapse each duplicate group into one record with `merge`.
///
/// Records without duplicates pass through unchanged. Output order is the
/// order in which each key first appears.
pub fn merge_duplicates<F>(records: &[Record], key_fields: &[String], merge: F) -> Vec<Record>
where
    F: Fn(&[Record]) -> Record,
{
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Record>> = HashMap::new();

    for record in records {
        let key = dedup_key(record, Some(key_fields));
        let group = groups.entry(key.clone()).or_default();
        if group.is_empty() {
            order.push(key);
        }
        group.push(record.clone());
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|group| {
            if group.len() > 1 {
                merge(&group)
            } else {
                group.into_iter().next().unwrap_or_default()
            }
        })
        .collect()
}

/// Default merge strategy: the first member wins
pub fn take_first(group: &[Record]) -> Record {
    group.first().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(value: Value) -> Vec<Record> {
        serde_json::from_value(value).unwrap()
    }

    fn k() -> Vec<String> {
        vec!["k".to_string()]
    }

    #[test]
    fn test_keep_first_vs_last() {
        let input = records(json!([{"k": 1, "v": "a"}, {"k": 1, "v": "b"}]));

        let first = deduplicate(input.clone(), Some(&k()), KeepPolicy::First);
        assert_eq!(first, records(json!([{"k": 1, "v": "a"}])));

        let last = deduplicate(input, Some(&k()), KeepPolicy::Last);
        assert_eq!(last, records(json!([{"k": 1, "v": "b"}])));
    }

    #[test]
    fn test_last_keeps_first_position() {
        let input = records(json!([
            {"k": 1, "v": "a"},
            {"k": 2, "v": "b"},
            {"k": 1, "v": "c"}
        ]));
        let out = deduplicate(input, Some(&k()), KeepPolicy::Last);
        assert_eq!(out, records(json!([{"k": 1, "v": "c"}, {"k": 2, "v": "b"}])));
    }

    #[test]
    fn test_whole_record_ignores_key_order() {
        let input = records(json!([
            {"a": 1, "b": [1, 2]},
            {"b": [1, 2], "a": 1},
            {"a": 1, "b": [2, 1]}
        ]));
        let out = deduplicate(input, None, KeepPolicy::First);
        assert_eq!(out.len(), 2);

        let input = records(json!([{"a": 1}, {"a": "1"}]));
        assert_eq!(deduplicate(input, None, KeepPolicy::First).len(), 2);
    }

    #[test]
    fn test_container_key_fields() {
        let input = records(json!([
            {"tags": {"x": 1, "y": 2}, "n": 1},
            {"tags": {"y": 2, "x": 1}, "n": 2}
        ]));
        let out = deduplicate(input, Some(&["tags".to_string()]), KeepPolicy::First);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["n"], json!(1));
    }

    #[test]
    fn test_hash_dedup() {
        let input = records(json!([{"a": 1, "b": 2}, {"b": 2, "a": 1}, {"a": 2}]));
        assert_eq!(deduplicate_by_hash(input, KeepPolicy::First).len(), 2);
    }

    #[test]
    fn test_find_duplicates() {
        let input = records(json!([
            {"k": 1, "v": "a"},
            {"k": 2, "v": "b"},
            {"k": 1, "v": "c"}
        ]));
        let groups = find_duplicates(&input, Some(&k()));

        assert_eq!(groups.len(), 1);
        let group = groups.values().next().unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group[1]["v"], json!("c"));

        assert!(find_duplicates(&input, None).is_empty());
    }

    #[test]
    fn test_merge_duplicates() {
        let input = records(json!([
            {"k": 2, "v": 10},
            {"k": 1, "v": 1},
            {"k": 2, "v": 5},
            {"k": 3, "v": 7}
        ]));

        let summed = merge_duplicates(&input, &k(), |group| {
            let total: i64 = group.iter().filter_map(|r| r["v"].as_i64()).sum();
            let mut merged = group[0].clone();
            merged.insert("v".into(), json!(total));
            merged
        });
        assert_eq!(
            summed,
            records(json!([{"k": 2, "v": 15}, {"k": 1, "v": 1}, {"k": 3, "v": 7}]))
        );

        let first = merge_duplicates(&input, &k(), take_first);
        assert_eq!(first[0], input[0]);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_deduplicate_relations_with_rules() {
        let mut relations = Relations::new();
        relations.extend_table("a_table", records(json!([{"id": 1, "x": 1}, {"id": 1, "x": 2}])));
        relations.extend_table("b_table", records(json!([{"id": 1}, {"id": 1}, {"id": 2}])));

        let mut rules = HashMap::new();
        rules.insert(
            "a_table".to_string(),
            DedupRule {
                key_fields: Some(vec!["id".into()]),
                keep: KeepPolicy::Last,
            },
        );

        let out = deduplicate_relations(relations, &rules);
        assert_eq!(out.get("a_table").unwrap(), records(json!([{"id": 1, "x": 2}])).as_slice());
        assert_eq!(out.get("b_table").unwrap().len(), 2);
    }
}
